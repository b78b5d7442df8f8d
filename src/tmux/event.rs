//! Control-line parsing for tmux control mode.
//!
//! tmux control mode is line oriented: command responses are bracketed by
//! `%begin`/`%end` (or `%error`), and everything else starting with `%` is
//! an asynchronous notification. One complete line (terminator already
//! stripped by the framer) parses to exactly one [`TmuxNotification`];
//! anything unrecognized is preserved as [`TmuxNotification::Other`] so the
//! controller can log it without losing information.

use crate::tmux::types::{TmuxPaneId, TmuxWindowId};

/// One parsed control-mode line.
#[derive(Debug, Clone, PartialEq)]
pub enum TmuxNotification {
    /// `%begin` — start of a command response block.
    Begin,
    /// `%end` — successful end of a command response block.
    End,
    /// `%error` — failed end of a command response block.
    Error {
        /// Remainder of the line.
        message: String,
    },
    /// `%output` / `%extended-output` — bytes produced by a pane.
    Output {
        pane: TmuxPaneId,
        /// Decoded bytes (tmux escaping removed).
        data: Vec<u8>,
    },
    /// `%window-add @N`
    WindowAdd { window: TmuxWindowId },
    /// `%window-close @N`
    WindowClose { window: TmuxWindowId },
    /// `%window-renamed @N name`
    WindowRenamed { window: TmuxWindowId, name: String },
    /// `%layout-change @N layout ...`
    LayoutChange { window: TmuxWindowId, layout: String },
    /// `%window-pane-changed @N %M`
    WindowPaneChanged {
        window: TmuxWindowId,
        pane: TmuxPaneId,
    },
    /// `%session-changed $N name`
    SessionChanged { name: String },
    /// Any other line, kept verbatim.
    Other { line: String },
}

impl TmuxNotification {
    /// Parse one complete control-mode line.
    pub fn parse(line: &str) -> Self {
        if line == "%begin" || line.starts_with("%begin ") {
            return Self::Begin;
        }
        if line == "%end" || line.starts_with("%end ") {
            return Self::End;
        }
        if let Some(rest) = strip_event(line, "%error") {
            return Self::Error {
                message: rest.to_string(),
            };
        }
        if let Some(rest) = strip_event(line, "%output") {
            if let Some((pane, data)) = split_token(rest)
                && let Ok(pane) = pane.parse()
            {
                return Self::Output {
                    pane,
                    data: unescape_output(data),
                };
            }
            return other(line);
        }
        if let Some(rest) = strip_event(line, "%extended-output") {
            // `%extended-output %N <age> <data>`; the age field is flow
            // control metadata; the payload routes exactly like %output.
            if let Some((pane, rest)) = split_token(rest)
                && let Ok(pane) = pane.parse()
                && let Some((_age, data)) = split_token(rest)
            {
                return Self::Output {
                    pane,
                    data: unescape_output(data),
                };
            }
            return other(line);
        }
        if let Some(rest) = strip_event(line, "%window-add") {
            if let Ok(window) = rest.trim().parse() {
                return Self::WindowAdd { window };
            }
            return other(line);
        }
        if let Some(rest) = strip_event(line, "%window-close") {
            if let Ok(window) = rest.trim().parse() {
                return Self::WindowClose { window };
            }
            return other(line);
        }
        if let Some(rest) = strip_event(line, "%window-renamed") {
            if let Some((window, name)) = split_token(rest)
                && let Ok(window) = window.parse()
            {
                return Self::WindowRenamed {
                    window,
                    name: name.to_string(),
                };
            }
            return other(line);
        }
        if let Some(rest) = strip_event(line, "%layout-change") {
            // The line may carry the visible layout and flags after the
            // window layout; only the first layout field matters here.
            if let Some((window, rest)) = split_token(rest)
                && let Ok(window) = window.parse()
            {
                let layout = rest.split_whitespace().next().unwrap_or("");
                if !layout.is_empty() {
                    return Self::LayoutChange {
                        window,
                        layout: layout.to_string(),
                    };
                }
            }
            return other(line);
        }
        if let Some(rest) = strip_event(line, "%window-pane-changed") {
            let mut fields = rest.split_whitespace();
            if let (Some(window), Some(pane)) = (fields.next(), fields.next())
                && let (Ok(window), Ok(pane)) = (window.parse(), pane.parse())
            {
                return Self::WindowPaneChanged { window, pane };
            }
            return other(line);
        }
        if let Some(rest) = strip_event(line, "%session-changed") {
            if let Some((_session, name)) = split_token(rest) {
                return Self::SessionChanged {
                    name: name.to_string(),
                };
            }
            return other(line);
        }

        other(line)
    }
}

fn other(line: &str) -> TmuxNotification {
    TmuxNotification::Other {
        line: line.to_string(),
    }
}

/// Strip `prefix` followed by a space. A bare `prefix` with no arguments is
/// not a match for the argument-carrying events.
fn strip_event<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_prefix(' ')
}

/// Split off the first space-delimited token; the remainder keeps any
/// further spaces verbatim (names and output payloads may contain them).
fn split_token(s: &str) -> Option<(&str, &str)> {
    match s.split_once(' ') {
        Some((token, rest)) => Some((token, rest)),
        None if !s.is_empty() => Some((s, "")),
        None => None,
    }
}

/// Decode tmux output escaping into raw bytes.
///
/// Rules: `\\` is a backslash, a 3-digit octal sequence is the byte with
/// that value, `\n`/`\r`/`\t` are their ASCII controls, and any other
/// escaped character is itself. Bytes outside escapes pass through
/// verbatim (tmux encodes each byte individually, so multi-byte UTF-8
/// arrives as consecutive octal escapes).
pub fn unescape_output(input: &str) -> Vec<u8> {
    let src = input.as_bytes();
    let len = src.len();
    let mut out = Vec::with_capacity(len);
    let mut i = 0;

    while i < len {
        if src[i] != b'\\' || i + 1 >= len {
            out.push(src[i]);
            i += 1;
            continue;
        }

        // Octal escape: exactly three digits in 0..=7.
        if i + 3 < len {
            let (d1, d2, d3) = (src[i + 1], src[i + 2], src[i + 3]);
            if (b'0'..=b'7').contains(&d1)
                && (b'0'..=b'7').contains(&d2)
                && (b'0'..=b'7').contains(&d3)
            {
                let val = (d1 - b'0') as u16 * 64 + (d2 - b'0') as u16 * 8 + (d3 - b'0') as u16;
                if let Ok(byte) = u8::try_from(val) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
                // \4xx and up exceed a byte; fall through as literal.
            }
        }

        match src[i + 1] {
            b'\\' => out.push(b'\\'),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            c => out.push(c),
        }
        i += 2;
    }

    out
}
