//! Events that re-enter the single executor.
//!
//! All I/O completion (PTY reader threads, helper replies, out-of-band
//! captures, probe timeouts) funnels through one channel of [`CoreEvent`]s
//! consumed by the workspace pump. State is only ever mutated while
//! handling one of these (or a direct host call), which is what makes the
//! core single-threaded cooperative.

use crate::ids::{ControlSessionId, PtySessionId};
use crate::pty::{PtyBackend, SessionKind};
use crate::tmux::TmuxPaneId;

/// An event delivered to the workspace executor.
#[derive(Debug)]
pub enum CoreEvent {
    /// Bytes arrived from a tracked child process.
    PtyData {
        session: PtySessionId,
        kind: SessionKind,
        backend: PtyBackend,
        bytes: Vec<u8>,
    },
    /// A tracked child process exited. Exactly one per session; nothing
    /// follows it.
    PtyExit {
        session: PtySessionId,
        kind: SessionKind,
        code: i32,
    },
    /// A socket-path wait interval elapsed for a pane awaiting hydration.
    HydrationTick {
        control: ControlSessionId,
        pane: TmuxPaneId,
    },
    /// An out-of-band history capture finished. `None` means the capture
    /// came back empty or failed.
    HydrationDone {
        control: ControlSessionId,
        pane: TmuxPaneId,
        history: Option<Vec<u8>>,
    },
    /// A bootstrap history prefetch finished.
    PrefetchDone {
        control: ControlSessionId,
        pane: TmuxPaneId,
        history: Vec<u8>,
    },
    /// The shell-probe window for a session closed without a result.
    ProbeTimeout { session: PtySessionId },
}
