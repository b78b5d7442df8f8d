//! Runtime configuration.
//!
//! Hosts construct a [`Config`] (or deserialize one from their own settings
//! layer) and hand it to the workspace. Every field has a default matching
//! the documented behavior, so `Config::default()` is a fully working setup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Core configuration shared by the PTY manager, controllers, and workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Initial PTY width in columns.
    pub default_cols: u16,
    /// Initial PTY height in rows.
    pub default_rows: u16,
    /// Shell override. When unset, resolution falls back to `$SHELL` and
    /// then the platform defaults.
    pub shell: Option<String>,
    /// Name or path of the tmux binary used for out-of-band invocations.
    pub tmux_binary: String,
    /// Default scrollback line count for explicit pane captures.
    pub capture_lines: u32,
    /// Override path for the PTY helper binary. When unset the helper is
    /// looked up next to the current executable.
    pub helper_path: Option<PathBuf>,
    /// In-band transaction timeout, milliseconds.
    pub transaction_timeout_ms: u64,
    /// Bootstrap buffer flush deadline per tmux pane, milliseconds.
    pub bootstrap_flush_ms: u64,
    /// Total shell-probe timeout, milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cols: 120,
            default_rows: 35,
            shell: None,
            tmux_binary: "tmux".to_string(),
            capture_lines: 2000,
            helper_path: None,
            transaction_timeout_ms: 5_000,
            bootstrap_flush_ms: 15_000,
            probe_timeout_ms: 2_200,
        }
    }
}

impl Config {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn bootstrap_flush_deadline(&self) -> Duration {
        Duration::from_millis(self.bootstrap_flush_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_cols, 120);
        assert_eq!(config.default_rows, 35);
        assert_eq!(config.transaction_timeout(), Duration::from_secs(5));
        assert_eq!(config.bootstrap_flush_deadline(), Duration::from_secs(15));
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"default_cols": 80}"#).unwrap();
        assert_eq!(config.default_cols, 80);
        assert_eq!(config.default_rows, 35);
        assert_eq!(config.tmux_binary, "tmux");
    }
}
