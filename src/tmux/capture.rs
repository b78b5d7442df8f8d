//! Out-of-band tmux invocations.
//!
//! History hydration and the session picker do not go through the control
//! stream: they run short-lived `tmux` subprocesses against the server
//! socket. This keeps bulk scrollback transfers off the control PTY, where
//! they would serialize behind the transaction queue.

use crate::tmux::types::TmuxPaneId;
use anyhow::Context as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Bounds for an explicit scrollback line request.
const MIN_CAPTURE_LINES: u32 = 100;
const MAX_CAPTURE_LINES: u32 = 5000;

/// Scrollback depth used by the hydration fallback capture.
pub(crate) const HYDRATE_FALLBACK_LINES: u32 = 3000;

/// Resolve the tmux binary, if present on this machine.
pub fn resolve_tmux(binary: &str) -> Option<PathBuf> {
    which::which(binary).ok()
}

/// Capture a pane's content.
///
/// Tries the full history first (`-S -`); when that comes back empty,
/// retries with a bounded line count (default 2000, clamped to
/// 100..=5000). The result keeps tmux's own line endings.
pub async fn capture_pane(
    binary: &str,
    socket: Option<&Path>,
    pane: TmuxPaneId,
    lines: Option<u32>,
) -> anyhow::Result<String> {
    let full = run_capture(binary, socket, pane, None).await?;
    if !full.trim().is_empty() {
        return Ok(full);
    }
    let lines = lines.unwrap_or(2000).clamp(MIN_CAPTURE_LINES, MAX_CAPTURE_LINES);
    run_capture(binary, socket, pane, Some(lines)).await
}

/// One `tmux capture-pane` invocation.
async fn run_capture(
    binary: &str,
    socket: Option<&Path>,
    pane: TmuxPaneId,
    lines: Option<u32>,
) -> anyhow::Result<String> {
    let program = resolve_tmux(binary)
        .ok_or_else(|| anyhow::anyhow!("tmux binary '{}' not found", binary))?;

    let mut cmd = Command::new(program);
    if let Some(socket) = socket {
        cmd.arg("-S").arg(socket);
    }
    cmd.arg("capture-pane").arg("-p").arg("-J");
    match lines {
        None => cmd.arg("-S").arg("-"),
        Some(n) => cmd.arg("-S").arg(format!("-{n}")),
    };
    cmd.arg("-t").arg(pane.to_string());

    let output = cmd.output().await.context("capture-pane failed to run")?;
    if !output.status.success() {
        anyhow::bail!(
            "capture-pane exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Capture used by history hydration: full history, then the bounded
/// fallback, normalized for a terminal grid. `None` when both come back
/// empty or tmux cannot be run.
pub(crate) async fn capture_history(
    binary: &str,
    socket: &Path,
    pane: TmuxPaneId,
) -> Option<Vec<u8>> {
    let text = match run_capture(binary, Some(socket), pane, None).await {
        Ok(text) if !text.trim().is_empty() => text,
        _ => match run_capture(binary, Some(socket), pane, Some(HYDRATE_FALLBACK_LINES)).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => return None,
        },
    };
    Some(normalize_history(text.as_bytes()))
}

/// Normalize captured history for replay into a terminal: every line ends
/// with `\r\n`, bare `\r` is dropped, and the result is terminated.
pub fn normalize_history(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + 2);
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'\r' => {
                if input.get(i + 1) == Some(&b'\n') {
                    out.extend_from_slice(b"\r\n");
                    i += 2;
                } else {
                    // Bare carriage returns would overprint the line.
                    i += 1;
                }
            }
            b'\n' => {
                out.extend_from_slice(b"\r\n");
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// List tmux session names, best effort: empty on Windows, on a missing
/// binary, or on any tmux error.
pub async fn list_sessions(binary: &str) -> Vec<String> {
    if cfg!(windows) {
        return Vec::new();
    }
    let Some(program) = resolve_tmux(binary) else {
        return Vec::new();
    };

    let output = Command::new(program)
        .arg("list-sessions")
        .arg("-F")
        .arg("#{session_name}")
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_history_line_endings() {
        assert_eq!(normalize_history(b"a\nb"), b"a\r\nb\r\n".to_vec());
        assert_eq!(normalize_history(b"a\r\nb\r\n"), b"a\r\nb\r\n".to_vec());
    }

    #[test]
    fn test_normalize_history_strips_bare_cr() {
        assert_eq!(normalize_history(b"a\rb\n"), b"ab\r\n".to_vec());
    }

    #[test]
    fn test_normalize_history_appends_terminator() {
        assert_eq!(normalize_history(b"tail"), b"tail\r\n".to_vec());
    }

    #[test]
    fn test_normalize_history_empty() {
        assert_eq!(normalize_history(b""), b"\r\n".to_vec());
    }
}
