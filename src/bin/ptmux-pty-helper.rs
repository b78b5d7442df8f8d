//! Companion PTY broker.
//!
//! Spawned by the core when it cannot open PTYs in-process. Reads
//! line-delimited JSON requests on stdin, owns the PTY pairs itself, and
//! emits line-delimited JSON replies and session events on stdout. One
//! request or reply per line; malformed lines are ignored.

use parking_lot::Mutex;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use ptmux_core::ids::PtySessionId;
use ptmux_core::pty::{HelperReply, HelperRequest, HelperSpawnOptions};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::sync::Arc;

struct HelperSession {
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

type Sessions = Arc<Mutex<HashMap<PtySessionId, Arc<HelperSession>>>>;

fn main() {
    let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
    let out = Arc::new(Mutex::new(std::io::stdout()));

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.is_empty() {
            continue;
        }
        let Ok(request) = serde_json::from_str::<HelperRequest>(&line) else {
            continue;
        };
        match request {
            HelperRequest::Create {
                session_id,
                command,
                args,
                options,
            } => create(&sessions, &out, session_id, &command, &args, options),
            HelperRequest::Write { session_id, data } => {
                if let Some(session) = sessions.lock().get(&session_id).cloned() {
                    let mut writer = session.writer.lock();
                    let _ = writer.write_all(&data).and_then(|_| writer.flush());
                }
            }
            HelperRequest::Resize {
                session_id,
                cols,
                rows,
            } => {
                if let Some(session) = sessions.lock().get(&session_id).cloned() {
                    let _ = session.master.lock().resize(PtySize {
                        rows,
                        cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    });
                }
            }
            HelperRequest::Kill { session_id } => {
                if let Some(session) = sessions.lock().get(&session_id).cloned() {
                    let _ = session.killer.lock().kill();
                }
            }
        }
    }

    // Parent went away: take every child down with us.
    for (_, session) in sessions.lock().drain() {
        let _ = session.killer.lock().kill();
    }
}

fn create(
    sessions: &Sessions,
    out: &Arc<Mutex<std::io::Stdout>>,
    session_id: PtySessionId,
    command: &str,
    args: &[String],
    options: HelperSpawnOptions,
) {
    match spawn(sessions, out, session_id, command, args, options) {
        Ok(pid) => send(out, &HelperReply::Created { session_id, pid }),
        Err(message) => send(
            out,
            &HelperReply::CreateError {
                session_id,
                message,
            },
        ),
    }
}

fn spawn(
    sessions: &Sessions,
    out: &Arc<Mutex<std::io::Stdout>>,
    session_id: PtySessionId,
    command: &str,
    args: &[String],
    options: HelperSpawnOptions,
) -> Result<u32, String> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: options.rows,
            cols: options.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| format!("openpty: {e}"))?;

    let mut cmd = CommandBuilder::new(command);
    cmd.args(args);
    cmd.env("TERM", &options.term);
    if let Some(cwd) = &options.cwd {
        cmd.cwd(cwd);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| format!("spawn: {e}"))?;
    drop(pair.slave);

    let pid = child.process_id().unwrap_or(0);
    let killer = child.clone_killer();
    let writer = pair.master.take_writer().map_err(|e| format!("writer: {e}"))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| format!("reader: {e}"))?;

    sessions.lock().insert(
        session_id,
        Arc::new(HelperSession {
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
        }),
    );

    let sessions = Arc::clone(sessions);
    let out = Arc::clone(out);
    std::thread::spawn(move || pump(sessions, out, session_id, reader, child));

    Ok(pid)
}

/// Forward child output until EOF, then reap and report the exit.
fn pump(
    sessions: Sessions,
    out: Arc<Mutex<std::io::Stdout>>,
    session_id: PtySessionId,
    mut reader: Box<dyn std::io::Read + Send>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
) {
    let mut buf = [0u8; 65536];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => send(
                &out,
                &HelperReply::Data {
                    session_id,
                    data: buf[..n].to_vec(),
                },
            ),
        }
    }

    let exit_code = match child.wait() {
        Ok(status) => status.exit_code() as i32,
        Err(_) => -1,
    };
    sessions.lock().remove(&session_id);
    send(
        &out,
        &HelperReply::Exit {
            session_id,
            exit_code,
        },
    );
}

fn send(out: &Arc<Mutex<std::io::Stdout>>, reply: &HelperReply) {
    if let Ok(line) = serde_json::to_string(reply) {
        let mut out = out.lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}
