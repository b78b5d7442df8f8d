//! PTY session manager.
//!
//! Owns every child process the core runs and exposes a uniform
//! write/resize/kill contract regardless of how the child is hosted.
//! Backends are tried in order per create: a native PTY, then the helper
//! process, then anonymous pipes as a degraded last resort. tmux control
//! sessions refuse the pipe path outright because tmux refuses `-CC` on a
//! non-tty.
//!
//! Per session the manager's event stream carries zero or more data events
//! followed by exactly one exit, after which the session id is dead.

mod helper;
mod native;
mod pipe;
pub mod shell;

pub use helper::{HelperReply, HelperRequest, HelperSpawnOptions};

use crate::config::Config;
use crate::error::CoreError;
use crate::event::CoreEvent;
use crate::ids::PtySessionId;
use helper::HelperClient;
use native::NativeSession;
use pipe::PipeSession;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// What a session is for. Control sessions get stricter backend rules and
/// their bytes route to the tmux controller instead of a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Shell,
    TmuxControl,
}

/// How the child is actually hosted. The helper counts as `Pty`: the child
/// sees a real terminal either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PtyBackend {
    Pty,
    Pipe,
}

/// A fully resolved spawn request, ready for a backend.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub kind: SessionKind,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
}

/// Host-facing spawn options; unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub kind: Option<SessionKind>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// What a successful create returns.
#[derive(Debug, Clone, Copy)]
pub struct SpawnResult {
    pub session: PtySessionId,
    pub pid: u32,
    pub backend: PtyBackend,
}

/// A cheap, clonable handle for one session.
#[derive(Clone)]
pub struct SessionHandle {
    id: PtySessionId,
    inner: Arc<HandleInner>,
}

enum HandleInner {
    Native(NativeSession),
    Helper(Arc<HelperClient>),
    Pipe(PipeSession),
}

impl SessionHandle {
    pub fn id(&self) -> PtySessionId {
        self.id
    }

    /// Write bytes to the child. Returns false only when the session is
    /// gone; writes are best-effort and never queued.
    pub fn write(&self, bytes: &[u8]) -> bool {
        match self.inner.as_ref() {
            HandleInner::Native(session) => session.write(bytes),
            HandleInner::Helper(client) => client.write(self.id, bytes),
            HandleInner::Pipe(session) => session.write(bytes),
        }
    }

    /// Resize the child's terminal. No-op (but true) on the pipe backend.
    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        match self.inner.as_ref() {
            HandleInner::Native(session) => session.resize(cols, rows),
            HandleInner::Helper(client) => {
                let (cols, rows) = shell::clamp_size(cols, rows);
                client.resize(self.id, cols, rows)
            }
            HandleInner::Pipe(session) => session.is_alive(),
        }
    }

    /// Kill the child process.
    pub fn kill(&self) -> bool {
        match self.inner.as_ref() {
            HandleInner::Native(session) => session.kill(),
            HandleInner::Helper(client) => client.kill(self.id),
            HandleInner::Pipe(session) => session.kill(),
        }
    }
}

struct SessionEntry {
    kind: SessionKind,
    backend: PtyBackend,
    handle: SessionHandle,
}

/// Registry of live child processes.
pub struct PtyManager {
    config: Config,
    events: UnboundedSender<CoreEvent>,
    sessions: HashMap<PtySessionId, SessionEntry>,
    helper: Option<Arc<HelperClient>>,
}

impl PtyManager {
    pub fn new(config: Config, events: UnboundedSender<CoreEvent>) -> Self {
        Self {
            config,
            events,
            sessions: HashMap::new(),
            helper: None,
        }
    }

    /// Spawn a child process, selecting the first backend that works.
    pub async fn create(&mut self, opts: SpawnOptions) -> Result<SpawnResult, CoreError> {
        let kind = opts.kind.unwrap_or(SessionKind::Shell);
        let command = match (&opts.command, kind) {
            (Some(command), _) => command.clone(),
            (None, SessionKind::Shell) => {
                shell::resolve_shell(None, self.config.shell.as_deref())
            }
            (None, SessionKind::TmuxControl) => self.config.tmux_binary.clone(),
        };
        let (cols, rows) = shell::clamp_size(
            opts.cols.unwrap_or(self.config.default_cols),
            opts.rows.unwrap_or(self.config.default_rows),
        );
        let spec = SpawnSpec {
            kind,
            command,
            args: opts.args,
            cwd: opts.cwd,
            cols,
            rows,
        };

        let id = PtySessionId::new();

        // 1. Native PTY.
        match NativeSession::spawn(id, &spec, self.events.clone()) {
            Ok(session) => {
                let pid = session.pid;
                return Ok(self.register(id, kind, PtyBackend::Pty, HandleInner::Native(session), pid));
            }
            Err(err) => {
                log::warn!("native pty backend failed for '{}': {}", spec.command, err);
            }
        }

        // 2. Helper process.
        match self.create_via_helper(id, &spec).await {
            Ok((pid, client)) => {
                return Ok(self.register(id, kind, PtyBackend::Pty, HandleInner::Helper(client), pid));
            }
            Err(err) => {
                log::warn!("helper pty backend failed for '{}': {}", spec.command, err);
            }
        }

        // 3. Pipes, never for control sessions.
        if kind == SessionKind::TmuxControl {
            return Err(CoreError::TmuxNeedsPty);
        }
        match PipeSession::spawn(id, &spec, self.events.clone()) {
            Ok(session) => {
                let pid = session.pid;
                Ok(self.register(id, kind, PtyBackend::Pipe, HandleInner::Pipe(session), pid))
            }
            Err(err) => Err(CoreError::SpawnFailed {
                shell: spec.command,
                message: err.to_string(),
            }),
        }
    }

    async fn create_via_helper(
        &mut self,
        id: PtySessionId,
        spec: &SpawnSpec,
    ) -> anyhow::Result<(u32, Arc<HelperClient>)> {
        let helper = self.ensure_helper()?;
        let pid = helper
            .create(
                id,
                spec.kind,
                &spec.command,
                &spec.args,
                HelperSpawnOptions {
                    cwd: spec.cwd.clone(),
                    cols: spec.cols,
                    rows: spec.rows,
                    term: shell::term_name().to_string(),
                },
            )
            .await?;
        Ok((pid, helper))
    }

    /// Spawn the helper singleton if it is missing or has crashed.
    fn ensure_helper(&mut self) -> anyhow::Result<Arc<HelperClient>> {
        if let Some(helper) = &self.helper
            && helper.is_alive()
        {
            return Ok(Arc::clone(helper));
        }

        let path = match &self.config.helper_path {
            Some(path) => path.clone(),
            None => {
                let mut path = std::env::current_exe()?;
                path.set_file_name("ptmux-pty-helper");
                path
            }
        };
        let helper = HelperClient::spawn(&path, self.events.clone())?;
        self.helper = Some(Arc::clone(&helper));
        Ok(helper)
    }

    fn register(
        &mut self,
        id: PtySessionId,
        kind: SessionKind,
        backend: PtyBackend,
        inner: HandleInner,
        pid: u32,
    ) -> SpawnResult {
        let handle = SessionHandle {
            id,
            inner: Arc::new(inner),
        };
        self.sessions.insert(
            id,
            SessionEntry {
                kind,
                backend,
                handle,
            },
        );
        SpawnResult {
            session: id,
            pid,
            backend,
        }
    }

    /// Get a clonable handle for a session.
    pub fn handle(&self, id: PtySessionId) -> Option<SessionHandle> {
        self.sessions.get(&id).map(|entry| entry.handle.clone())
    }

    pub fn kind(&self, id: PtySessionId) -> Option<SessionKind> {
        self.sessions.get(&id).map(|entry| entry.kind)
    }

    pub fn backend(&self, id: PtySessionId) -> Option<PtyBackend> {
        self.sessions.get(&id).map(|entry| entry.backend)
    }

    /// Write to a session; false when the session is unknown or gone.
    pub fn write(&self, id: PtySessionId, bytes: &[u8]) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|entry| entry.handle.write(bytes))
    }

    pub fn resize(&self, id: PtySessionId, cols: u16, rows: u16) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|entry| entry.handle.resize(cols, rows))
    }

    pub fn kill(&self, id: PtySessionId) -> bool {
        self.sessions
            .get(&id)
            .is_some_and(|entry| entry.handle.kill())
    }

    /// Forget a session once its exit event has been observed.
    pub fn note_exit(&mut self, id: PtySessionId) {
        self.sessions.remove(&id);
    }

    /// Kill everything, including the helper singleton.
    pub fn shutdown(&mut self) {
        for (id, entry) in self.sessions.drain() {
            log::debug!("shutdown: killing pty {}", id);
            entry.handle.kill();
        }
        if let Some(helper) = self.helper.take() {
            helper.shutdown();
        }
    }
}
