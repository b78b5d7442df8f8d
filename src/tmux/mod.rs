//! tmux control-mode integration.
//!
//! tmux control mode (`tmux -CC`) exchanges a line-oriented protocol
//! instead of rendering to a terminal: window and pane events arrive as
//! `%`-prefixed notifications, command responses as `%begin`/`%end`
//! blocks. This module turns that stream into native tabs and panes:
//!
//! - `types.rs`: tmux domain identifiers (`%N`, `@N`, `$N`)
//! - `event.rs`: one control line → one typed notification
//! - `layout.rs`: layout-string parsing into a binary split tree
//! - `commands.rs`: builders for everything written back to tmux
//! - `controller.rs`: the per-connection state machine
//! - `capture.rs`: out-of-band `capture-pane` and session listing
//! - `probe.rs`: shell-probe discovery before attaching

pub mod capture;
pub mod commands;
mod controller;
mod event;
mod layout;
pub mod probe;
mod types;

pub use commands::TmuxCommand;
pub(crate) use controller::SOCKET_WAIT_INTERVAL;
pub use controller::{ControlLink, ControllerJob, ControllerPhase, PaneBinding, TmuxController};
pub use event::{TmuxNotification, unescape_output};
pub use layout::{TmuxLayout, TmuxLayoutNode};
pub use types::{TmuxPaneId, TmuxSessionId, TmuxWindowId};
