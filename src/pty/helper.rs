//! Helper-process PTY backend.
//!
//! When the in-process PTY backend is unavailable, sessions are brokered
//! through a companion process (`ptmux-pty-helper`) that opens the PTYs
//! itself and speaks line-delimited JSON over stdin/stdout. The helper is a
//! lazy process-wide singleton: spawned on first use, killed on shutdown,
//! and respawned by the next create after a crash. In-flight writes to a
//! dead helper are lost; that is the documented best-effort contract.

use crate::event::CoreEvent;
use crate::ids::PtySessionId;
use crate::pty::{PtyBackend, SessionKind};
use anyhow::Context as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// How long a `create` waits for the helper's reply.
const CREATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options attached to a helper `create` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperSpawnOptions {
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub term: String,
}

/// Requests written to the helper's stdin, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HelperRequest {
    Create {
        session_id: PtySessionId,
        command: String,
        args: Vec<String>,
        options: HelperSpawnOptions,
    },
    Write {
        session_id: PtySessionId,
        data: Vec<u8>,
    },
    Resize {
        session_id: PtySessionId,
        cols: u16,
        rows: u16,
    },
    Kill {
        session_id: PtySessionId,
    },
}

/// Replies and spontaneous messages read from the helper's stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HelperReply {
    Created {
        session_id: PtySessionId,
        pid: u32,
    },
    CreateError {
        session_id: PtySessionId,
        message: String,
    },
    Data {
        session_id: PtySessionId,
        data: Vec<u8>,
    },
    Exit {
        session_id: PtySessionId,
        exit_code: i32,
    },
}

/// Client side of the helper connection.
pub(crate) struct HelperClient {
    alive: Arc<AtomicBool>,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    /// Creates awaiting their `created` / `create-error` reply.
    pending: Arc<Mutex<HashMap<PtySessionId, PendingCreate>>>,
    /// Sessions currently owned by this helper, with their event tag.
    sessions: Arc<Mutex<HashMap<PtySessionId, SessionKind>>>,
}

/// A create in flight. The reader thread moves the entry into `sessions`
/// the moment `created` arrives, so data following it is never dropped.
struct PendingCreate {
    kind: SessionKind,
    reply: oneshot::Sender<Result<u32, String>>,
}

impl HelperClient {
    /// Spawn the helper process and start its reply reader.
    pub(crate) fn spawn(
        helper_path: &Path,
        events: UnboundedSender<CoreEvent>,
    ) -> anyhow::Result<Arc<Self>> {
        let mut child = Command::new(helper_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn helper '{}'", helper_path.display()))?;

        let stdin = child.stdin.take().context("helper stdin missing")?;
        let stdout = child.stdout.take().context("helper stdout missing")?;

        let client = Arc::new(Self {
            alive: Arc::new(AtomicBool::new(true)),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        });

        let alive = Arc::clone(&client.alive);
        let pending = Arc::clone(&client.pending);
        let sessions = Arc::clone(&client.sessions);
        std::thread::spawn(move || {
            reader_loop(stdout, events, pending, sessions, alive);
        });

        log::info!("pty helper spawned from {}", helper_path.display());
        Ok(client)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether this helper still tracks the given session.
    pub(crate) fn owns(&self, id: PtySessionId) -> bool {
        self.is_alive() && self.sessions.lock().contains_key(&id)
    }

    /// Create a session through the helper and wait for its pid.
    pub(crate) async fn create(
        &self,
        id: PtySessionId,
        kind: SessionKind,
        command: &str,
        args: &[String],
        options: HelperSpawnOptions,
    ) -> anyhow::Result<u32> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, PendingCreate { kind, reply: tx });

        let sent = self.send(&HelperRequest::Create {
            session_id: id,
            command: command.to_string(),
            args: args.to_vec(),
            options,
        });
        if !sent {
            self.pending.lock().remove(&id);
            anyhow::bail!("helper is not running");
        }

        let reply = tokio::time::timeout(CREATE_TIMEOUT, rx)
            .await
            .map_err(|_| anyhow::anyhow!("helper create timed out"))?
            .map_err(|_| anyhow::anyhow!("helper went away during create"))?;

        match reply {
            Ok(pid) => Ok(pid),
            Err(message) => anyhow::bail!("helper create failed: {message}"),
        }
    }

    pub(crate) fn write(&self, id: PtySessionId, data: &[u8]) -> bool {
        self.owns(id)
            && self.send(&HelperRequest::Write {
                session_id: id,
                data: data.to_vec(),
            })
    }

    pub(crate) fn resize(&self, id: PtySessionId, cols: u16, rows: u16) -> bool {
        self.owns(id)
            && self.send(&HelperRequest::Resize {
                session_id: id,
                cols,
                rows,
            })
    }

    pub(crate) fn kill(&self, id: PtySessionId) -> bool {
        self.owns(id) && self.send(&HelperRequest::Kill { session_id: id })
    }

    /// Terminate the helper process itself.
    pub(crate) fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.child.lock().kill();
    }

    fn send(&self, request: &HelperRequest) -> bool {
        if !self.is_alive() {
            return false;
        }
        let line = match serde_json::to_string(request) {
            Ok(line) => line,
            Err(err) => {
                log::error!("helper request serialization failed: {}", err);
                return false;
            }
        };
        let mut stdin = self.stdin.lock();
        writeln!(stdin, "{line}").and_then(|_| stdin.flush()).is_ok()
    }
}

/// Reads helper replies until EOF, then fails everything the helper owned.
fn reader_loop(
    stdout: std::process::ChildStdout,
    events: UnboundedSender<CoreEvent>,
    pending: Arc<Mutex<HashMap<PtySessionId, PendingCreate>>>,
    sessions: Arc<Mutex<HashMap<PtySessionId, SessionKind>>>,
    alive: Arc<AtomicBool>,
) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.is_empty() {
            continue;
        }
        let reply: HelperReply = match serde_json::from_str(&line) {
            Ok(reply) => reply,
            Err(err) => {
                // Malformed helper lines are ignored.
                log::debug!("helper sent unparseable line ({}): {:?}", err, line);
                continue;
            }
        };
        match reply {
            HelperReply::Created { session_id, pid } => {
                if let Some(create) = pending.lock().remove(&session_id) {
                    sessions.lock().insert(session_id, create.kind);
                    let _ = create.reply.send(Ok(pid));
                }
            }
            HelperReply::CreateError {
                session_id,
                message,
            } => {
                if let Some(create) = pending.lock().remove(&session_id) {
                    let _ = create.reply.send(Err(message));
                }
            }
            HelperReply::Data { session_id, data } => {
                let kind = sessions.lock().get(&session_id).copied();
                if let Some(kind) = kind {
                    let _ = events.send(CoreEvent::PtyData {
                        session: session_id,
                        kind,
                        backend: PtyBackend::Pty,
                        bytes: data,
                    });
                }
            }
            HelperReply::Exit {
                session_id,
                exit_code,
            } => {
                if let Some(kind) = sessions.lock().remove(&session_id) {
                    let _ = events.send(CoreEvent::PtyExit {
                        session: session_id,
                        kind,
                        code: exit_code,
                    });
                }
            }
        }
    }

    // Helper is gone: fail pending creates and close out every session it
    // owned so the one-exit-per-session contract still holds.
    alive.store(false, Ordering::Release);
    log::warn!("pty helper exited");
    for (_, create) in pending.lock().drain() {
        let _ = create.reply.send(Err("helper exited".to_string()));
    }
    for (session_id, kind) in sessions.lock().drain() {
        let _ = events.send(CoreEvent::PtyExit {
            session: session_id,
            kind,
            code: -1,
        });
    }
}
