//! ptmux-core: terminal multiplexer front-end core.
//!
//! The headless heart of a tmux-aware terminal: a PTY session manager, a
//! tmux control-mode client, and the native tab/pane model that bridges
//! them to whatever shell embeds this crate.
//!
//! Three subsystems own all state:
//!
//! - [`pty::PtyManager`]: every child process, behind a uniform
//!   write/resize/kill contract with backend fallback (native PTY →
//!   helper process → pipes).
//! - [`tmux::TmuxController`]: one per `tmux -CC` connection: protocol
//!   parsing, transaction correlation, layout reconciliation, history
//!   hydration.
//! - [`workspace::Workspace`]: the tab set and the router between user
//!   actions, PTYs, and controllers, driven by a single-threaded event
//!   pump.
//!
//! Typical embedding:
//!
//! ```no_run
//! use ptmux_core::{Config, Workspace};
//! use ptmux_core::pty::SpawnOptions;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut workspace = Workspace::new(Config::default());
//! let tab = workspace.new_local_tab(SpawnOptions::default()).await?;
//! let pane = workspace.tabs().get(tab).unwrap().active_pane;
//! workspace.register_pane_writer(pane, Box::new(|bytes: &[u8]| {
//!     // feed the terminal grid
//!     let _ = bytes;
//! }));
//! workspace.run().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod layout;
pub mod pty;
pub mod tmux;
pub mod workspace;

pub use config::Config;
pub use error::CoreError;
pub use event::CoreEvent;
pub use ids::{ControlSessionId, PaneId, PtySessionId, TabId};
pub use layout::{Branch, LayoutNode, SplitDirection};
pub use workspace::{MenuAction, TmuxAttachOptions, Workspace};
