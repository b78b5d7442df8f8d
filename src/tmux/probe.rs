//! Shell-probe discovery of a (possibly remote) tmux.
//!
//! Before attaching, the workspace can ask "what tmux sessions exist where
//! this shell is running?" This matters when the shell in the active
//! pane is an ssh session. The probe writes a small marker-delimited
//! script into the shell and scrapes its output back out of the pane
//! stream:
//!
//! ```text
//! __PTMUX_BEGIN_<token>__
//! __PTMUX_CTX__::<user>::<hostname>::<$SSH_CONNECTION>
//! <session name>...
//! __PTMUX_END_<token>__
//! ```
//!
//! `$SSH_CONNECTION` fields 3 and 4 are the server-side address and port,
//! which become the ssh target for the subsequent control-mode attach.
//! Malformed context degrades to "Local machine" with no target.

use regex::Regex;
use uuid::Uuid;

const CTX_MARKER: &str = "__PTMUX_CTX__";

/// What a completed probe learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Human-readable origin ("user@host" or "Local machine").
    pub source_label: String,
    /// ssh target for attaching, when the shell is remote.
    pub ssh_target: Option<String>,
    /// ssh port, when the shell is remote.
    pub ssh_port: Option<u16>,
    /// tmux session names visible from that shell.
    pub sessions: Vec<String>,
}

impl ProbeReport {
    /// The report used when the probe times out.
    pub fn local_fallback() -> Self {
        Self {
            source_label: "Local machine".to_string(),
            ssh_target: None,
            ssh_port: None,
            sessions: Vec::new(),
        }
    }
}

/// The script written into the probed shell.
pub fn probe_script(token: &str) -> String {
    format!(
        "printf '__PTMUX_BEGIN_{token}__\\n'; \
         printf '{CTX_MARKER}::%s::%s::%s\\n' \"$USER\" \"$HOSTNAME\" \"$SSH_CONNECTION\"; \
         tmux list-sessions -F '#{{session_name}}' 2>/dev/null; \
         printf '__PTMUX_END_{token}__\\n'\n"
    )
}

/// Generate a probe token.
pub fn probe_token() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// Incremental scanner over a pane's output stream.
///
/// Feed it raw pane bytes; it answers with a report once the end marker
/// has been seen. The shell echoes the probe script back, so markers are
/// matched as whole lines only.
pub struct ProbeCollector {
    begin: String,
    end: String,
    buffer: String,
    ansi: Regex,
}

impl ProbeCollector {
    pub fn new(token: &str) -> Self {
        Self {
            begin: format!("__PTMUX_BEGIN_{token}__"),
            end: format!("__PTMUX_END_{token}__"),
            buffer: String::new(),
            ansi: Regex::new(r"\x1b\[[0-9;?]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]")
                .expect("static regex"),
        }
    }

    /// Feed pane output. Returns the report once the end marker arrives.
    pub fn feed(&mut self, bytes: &[u8]) -> Option<ProbeReport> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let clean = self.ansi.replace_all(&self.buffer, "");
        let lines: Vec<&str> = clean.lines().map(str::trim_end).collect();

        let begin = lines.iter().position(|line| line.trim() == self.begin)?;
        let end = lines[begin..]
            .iter()
            .position(|line| line.trim() == self.end)?
            + begin;

        let mut ctx: Option<&str> = None;
        let mut sessions = Vec::new();
        for line in &lines[begin + 1..end] {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with(CTX_MARKER) {
                ctx = Some(line);
            } else {
                sessions.push(line.to_string());
            }
        }

        let (source_label, ssh_target, ssh_port) = infer_context(ctx);
        Some(ProbeReport {
            source_label,
            ssh_target,
            ssh_port,
            sessions,
        })
    }
}

/// Derive `(label, ssh_target, ssh_port)` from a `__PTMUX_CTX__` line.
///
/// `$SSH_CONNECTION` is `client_ip client_port server_ip server_port`; no
/// validation beyond field count is attempted; anything malformed means
/// "local".
fn infer_context(ctx: Option<&str>) -> (String, Option<String>, Option<u16>) {
    let Some(ctx) = ctx else {
        return ("Local machine".to_string(), None, None);
    };

    let mut fields = ctx.splitn(4, "::");
    let _marker = fields.next();
    let user = fields.next().unwrap_or("").trim();
    let hostname = fields.next().unwrap_or("").trim();
    let ssh_connection = fields.next().unwrap_or("").trim();

    let ssh_fields: Vec<&str> = ssh_connection.split_whitespace().collect();
    if ssh_fields.len() == 4 {
        let server_ip = ssh_fields[2];
        let port = ssh_fields[3].parse().ok();
        let target = if user.is_empty() {
            server_ip.to_string()
        } else {
            format!("{user}@{server_ip}")
        };
        let label = if hostname.is_empty() {
            target.clone()
        } else if user.is_empty() {
            hostname.to_string()
        } else {
            format!("{user}@{hostname}")
        };
        return (label, Some(target), port);
    }

    ("Local machine".to_string(), None, None)
}
