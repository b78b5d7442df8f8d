//! tmux command builders for control mode.
//!
//! Commands are written to the control PTY as newline-terminated lines.
//! User keystrokes always go through `send-keys -H` (hex bytes) so no
//! shell-escape ambiguity can corrupt input.

use crate::tmux::types::{TmuxPaneId, TmuxWindowId};
use std::fmt::Write as _;

/// Marker prefix for the socket-path bootstrap probe.
pub const SOCKET_MARKER: &str = "__SOCKET__";
/// Marker prefix for per-pane bootstrap lines.
pub const PANE_MARKER: &str = "__PANE__";
/// Marker prefix for per-window bootstrap lines.
pub const WINDOW_MARKER: &str = "__WINDOW__";

/// A tmux command ready to be sent on the control PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxCommand {
    command: String,
}

impl TmuxCommand {
    fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The command string without the trailing newline.
    pub fn as_str(&self) -> &str {
        &self.command
    }

    /// The command as bytes for writing to the control PTY, newline added.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = self.command.as_bytes().to_vec();
        bytes.push(b'\n');
        bytes
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Ask tmux for its socket path, tagged so the response line can be
    /// sniffed out of the control stream.
    pub fn socket_probe() -> Self {
        Self::new(format!(
            "display-message -p \"{SOCKET_MARKER}::#{{socket_path}}\""
        ))
    }

    /// List every pane in the session as `__PANE__::@W::%P` lines.
    pub fn list_panes_probe() -> Self {
        Self::new(format!(
            "list-panes -s -F \"{PANE_MARKER}::#{{window_id}}::#{{pane_id}}\""
        ))
    }

    /// List every window as `__WINDOW__::@W::name::layout` lines.
    pub fn list_windows_probe() -> Self {
        Self::new(format!(
            "list-windows -F \"{WINDOW_MARKER}::#{{window_id}}::#{{window_name}}::#{{window_layout}}\""
        ))
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Send raw bytes to a pane, hex-encoded.
    pub fn send_keys_hex(pane: TmuxPaneId, bytes: &[u8]) -> Self {
        let mut cmd = format!("send-keys -t {pane} -H");
        for byte in bytes {
            // Infallible on String.
            let _ = write!(cmd, " {byte:02x}");
        }
        Self::new(cmd)
    }

    // =========================================================================
    // Panes and windows
    // =========================================================================

    /// Split a pane; `horizontal` means side-by-side (tmux `-h`).
    pub fn split_window(pane: TmuxPaneId, horizontal: bool) -> Self {
        let flag = if horizontal { "-h" } else { "-v" };
        Self::new(format!("split-window {flag} -t {pane}"))
    }

    pub fn kill_pane(pane: TmuxPaneId) -> Self {
        Self::new(format!("kill-pane -t {pane}"))
    }

    pub fn kill_window(window: TmuxWindowId) -> Self {
        Self::new(format!("kill-window -t {window}"))
    }

    pub fn select_window(window: TmuxWindowId) -> Self {
        Self::new(format!("select-window -t {window}"))
    }

    pub fn select_pane(pane: TmuxPaneId) -> Self {
        Self::new(format!("select-pane -t {pane}"))
    }

    pub fn detach_client() -> Self {
        Self::new("detach-client")
    }

    // =========================================================================
    // Sizing
    // =========================================================================

    /// Resize one pane to an absolute size.
    pub fn resize_pane(pane: TmuxPaneId, cols: u16, rows: u16) -> Self {
        Self::new(format!("resize-pane -t {pane} -x {cols} -y {rows}"))
    }

    /// Set the control client's virtual screen size.
    ///
    /// In control mode tmux does not know the terminal size unless told;
    /// the format is `CxR` with a lowercase `x`.
    pub fn set_client_size(cols: u16, rows: u16) -> Self {
        Self::new(format!("refresh-client -C {cols}x{rows}"))
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Capture a pane's full history, joined-wrapped, in-band.
    pub fn capture_pane(pane: TmuxPaneId) -> Self {
        Self::new(format!("capture-pane -p -J -S - -t {pane}"))
    }
}

/// Argv for spawning a local control-mode client.
///
/// `tmux -CC new-session -A -s <name>`, or an unnamed `new-session` when no
/// name is given.
pub fn control_mode_argv(tmux_binary: &str, session_name: Option<&str>) -> Vec<String> {
    let mut argv = vec![
        tmux_binary.to_string(),
        "-CC".to_string(),
        "new-session".to_string(),
    ];
    if let Some(name) = session_name {
        argv.push("-A".to_string());
        argv.push("-s".to_string());
        argv.push(name.to_string());
    }
    argv
}

/// Argv for spawning a control-mode client over ssh.
pub fn ssh_control_mode_argv(
    target: &str,
    port: Option<u16>,
    session_name: Option<&str>,
) -> Vec<String> {
    let mut argv = vec!["ssh".to_string()];
    if let Some(port) = port {
        argv.push("-p".to_string());
        argv.push(port.to_string());
    }
    argv.push("-tt".to_string());
    argv.push(target.to_string());
    argv.extend(control_mode_argv("tmux", session_name));
    argv
}
