//! Error kinds the host is expected to distinguish.
//!
//! Local recoveries (layout parse failures, capture timeouts, transaction
//! expiry) never surface here; they are logged and absorbed where they occur.

use crate::ids::{PaneId, PtySessionId};
use thiserror::Error;

/// Errors surfaced to the embedding host.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No backend could spawn the requested child process.
    #[error("failed to spawn '{shell}': {message}")]
    SpawnFailed { shell: String, message: String },

    /// A tmux control session would have landed on the pipe backend.
    ///
    /// tmux refuses `-CC` on a non-tty, so this is a hard failure rather
    /// than a degraded spawn.
    #[error("tmux control mode requires a PTY backend")]
    TmuxNeedsPty,

    /// The referenced PTY session is not (or no longer) registered.
    #[error("unknown pty session {0}")]
    UnknownSession(PtySessionId),

    /// The referenced pane does not exist in any tab.
    #[error("unknown pane {0}")]
    UnknownPane(PaneId),

    /// The workspace has no active tab to act on.
    #[error("no active tab")]
    NoActiveTab,
}
