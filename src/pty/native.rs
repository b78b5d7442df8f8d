//! Primary PTY backend built on `portable-pty`.
//!
//! Each session owns a pseudoterminal pair and one reader thread. The
//! reader pumps child output into the core event channel and, on EOF,
//! reaps the child and emits the session's single exit event. Ordering is
//! guaranteed by construction: data and exit are produced by the same
//! thread.

use crate::event::CoreEvent;
use crate::ids::PtySessionId;
use crate::pty::shell::{clamp_size, term_name};
use crate::pty::{PtyBackend, SessionKind, SpawnSpec};
use anyhow::Context as _;
use parking_lot::Mutex;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;

/// A live native-PTY session.
pub(crate) struct NativeSession {
    pub(crate) pid: u32,
    alive: Arc<AtomicBool>,
    writer: Mutex<Box<dyn Write + Send>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl NativeSession {
    /// Allocate a PTY, spawn the command on its secondary side, and start
    /// the reader thread.
    pub(crate) fn spawn(
        id: PtySessionId,
        spec: &SpawnSpec,
        events: UnboundedSender<CoreEvent>,
    ) -> anyhow::Result<Self> {
        let (cols, rows) = clamp_size(spec.cols, spec.rows);
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("openpty failed")?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.env("TERM", term_name());
        if let Some(cwd) = &spec.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("spawn '{}' failed", spec.command))?;
        // The secondary handle must be dropped after spawn so the child
        // owns the sole reference to it (ConPTY requires this, and it is
        // what turns child exit into reader EOF elsewhere).
        drop(pair.slave);

        let pid = child.process_id().unwrap_or(0);
        let killer = child.clone_killer();
        let writer = pair.master.take_writer().context("take_writer failed")?;
        let reader = pair
            .master
            .try_clone_reader()
            .context("clone reader failed")?;

        let alive = Arc::new(AtomicBool::new(true));
        spawn_reader(id, spec.kind, reader, child, events, Arc::clone(&alive));

        log::info!(
            "pty {}: spawned '{}' (pid {}, {}x{})",
            id,
            spec.command,
            pid,
            cols,
            rows
        );

        Ok(Self {
            pid,
            alive,
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            killer: Mutex::new(killer),
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> bool {
        if !self.is_alive() {
            return false;
        }
        let mut writer = self.writer.lock();
        writer.write_all(bytes).and_then(|_| writer.flush()).is_ok()
    }

    pub(crate) fn resize(&self, cols: u16, rows: u16) -> bool {
        if !self.is_alive() {
            return false;
        }
        let (cols, rows) = clamp_size(cols, rows);
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .is_ok()
    }

    pub(crate) fn kill(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.killer.lock().kill().is_ok()
    }
}

/// Reader thread: child output until EOF, then reap and report exit.
fn spawn_reader(
    id: PtySessionId,
    kind: SessionKind,
    mut reader: Box<dyn std::io::Read + Send>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
    events: UnboundedSender<CoreEvent>,
    alive: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 65536];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = events.send(CoreEvent::PtyData {
                        session: id,
                        kind,
                        backend: PtyBackend::Pty,
                        bytes: buf[..n].to_vec(),
                    });
                }
            }
        }

        let code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(err) => {
                log::warn!("pty {}: wait failed: {}", id, err);
                -1
            }
        };
        alive.store(false, Ordering::Release);
        log::info!("pty {}: exited with code {}", id, code);
        let _ = events.send(CoreEvent::PtyExit {
            session: id,
            kind,
            code,
        });
    });
}
