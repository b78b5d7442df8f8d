//! Shell resolution and child environment defaults.

use std::path::Path;

/// Minimum PTY width accepted anywhere a size crosses the boundary.
pub const MIN_COLS: u16 = 10;
/// Minimum PTY height.
pub const MIN_ROWS: u16 = 5;

/// Clamp a requested size to the supported minimums.
pub fn clamp_size(cols: u16, rows: u16) -> (u16, u16) {
    (cols.max(MIN_COLS), rows.max(MIN_ROWS))
}

/// Terminal name advertised to children spawned under a PTY.
pub fn term_name() -> &'static str {
    if cfg!(windows) {
        "xterm-256color"
    } else {
        "xterm-color"
    }
}

/// Resolve the shell to spawn.
///
/// Order: explicit request, configured override, `$SHELL`, then the first
/// existing platform default, finally `/bin/sh`. On Windows `%COMSPEC%`
/// wins, with `powershell.exe` as the fallback.
pub fn resolve_shell(requested: Option<&str>, configured: Option<&str>) -> String {
    if let Some(shell) = requested {
        return shell.to_string();
    }
    if let Some(shell) = configured {
        return shell.to_string();
    }

    if cfg!(windows) {
        return std::env::var("COMSPEC").unwrap_or_else(|_| "powershell.exe".to_string());
    }

    if let Ok(shell) = std::env::var("SHELL")
        && !shell.is_empty()
    {
        return shell;
    }

    for candidate in ["/bin/zsh", "/bin/bash"] {
        if Path::new(candidate).exists() {
            return candidate.to_string();
        }
    }

    "/bin/sh".to_string()
}

/// Short display name for a shell path ("/bin/zsh" -> "zsh").
pub fn shell_display_name(shell: &str) -> String {
    Path::new(shell)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(shell)
        .to_string()
}
