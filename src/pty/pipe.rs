//! Degraded backend: anonymous pipes instead of a PTY.
//!
//! Used only when both the native PTY and the helper are unavailable.
//! Children see no tty, so the backend papers over the worst differences:
//! interactive flag injection for bare shells, color-friendly environment
//! variables, `\n` → `\r\n` normalization on the way out, and Ctrl-C
//! translated into a real SIGINT because there is no line discipline to do
//! it for us. Resize is a no-op. tmux control mode is never allowed here.

use crate::event::CoreEvent;
use crate::ids::PtySessionId;
use crate::pty::{PtyBackend, SessionKind, SpawnSpec};
use anyhow::Context as _;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// A live pipe-backed session.
pub(crate) struct PipeSession {
    pub(crate) pid: u32,
    alive: Arc<AtomicBool>,
    stdin: Mutex<ChildStdin>,
    child: Arc<Mutex<Child>>,
}

impl PipeSession {
    pub(crate) fn spawn(
        id: PtySessionId,
        spec: &SpawnSpec,
        events: UnboundedSender<CoreEvent>,
    ) -> anyhow::Result<Self> {
        let mut args = spec.args.clone();
        // A bare shell with no tty still gets an interactive prompt.
        if args.is_empty() && spec.kind == SessionKind::Shell {
            args.push("-i".to_string());
        }

        let mut cmd = Command::new(&spec.command);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in [
            ("TERM", "xterm-256color"),
            ("COLORTERM", "truecolor"),
            ("FORCE_COLOR", "1"),
        ] {
            if std::env::var_os(key).is_none() {
                cmd.env(key, value);
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("pipe spawn '{}' failed", spec.command))?;
        let pid = child.id();
        let stdin = child.stdin.take().context("child stdin missing")?;
        let stdout = child.stdout.take().context("child stdout missing")?;
        let stderr = child.stderr.take().context("child stderr missing")?;

        let alive = Arc::new(AtomicBool::new(true));
        let child = Arc::new(Mutex::new(child));

        let stdout_thread = spawn_output_reader(id, spec.kind, stdout, events.clone());
        let stderr_thread = spawn_output_reader(id, spec.kind, stderr, events.clone());
        spawn_exit_watcher(
            id,
            spec.kind,
            Arc::clone(&child),
            vec![stdout_thread, stderr_thread],
            events,
            Arc::clone(&alive),
        );

        log::warn!(
            "pty {}: running '{}' on the pipe backend (no tty)",
            id,
            spec.command
        );

        Ok(Self {
            pid,
            alive,
            stdin: Mutex::new(stdin),
            child,
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Write input. A `0x03` anywhere in the buffer becomes a SIGINT to the
    /// child and is elided from what reaches stdin.
    pub(crate) fn write(&self, bytes: &[u8]) -> bool {
        if !self.is_alive() {
            return false;
        }

        let payload: Vec<u8> = if bytes.contains(&0x03) {
            self.send_interrupt();
            bytes.iter().copied().filter(|b| *b != 0x03).collect()
        } else {
            bytes.to_vec()
        };

        if payload.is_empty() {
            return true;
        }
        let mut stdin = self.stdin.lock();
        stdin.write_all(&payload).and_then(|_| stdin.flush()).is_ok()
    }

    pub(crate) fn kill(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.child.lock().kill().is_ok()
    }

    #[cfg(unix)]
    fn send_interrupt(&self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        if let Err(err) = kill(Pid::from_raw(self.pid as i32), Signal::SIGINT) {
            log::debug!("pty: SIGINT to pid {} failed: {}", self.pid, err);
        }
    }

    #[cfg(not(unix))]
    fn send_interrupt(&self) {
        // No SIGINT without a console; the byte is dropped.
    }
}

/// Rewrite bare `\n` as `\r\n`, tracking the previous byte across chunks.
fn normalize_newlines(input: &[u8], prev: &mut u8, out: &mut Vec<u8>) {
    for &byte in input {
        if byte == b'\n' && *prev != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        *prev = byte;
    }
}

/// Reader for one of the child's output pipes. stdout and stderr fan into
/// the same event stream.
fn spawn_output_reader(
    id: PtySessionId,
    kind: SessionKind,
    mut pipe: impl Read + Send + 'static,
    events: UnboundedSender<CoreEvent>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 65536];
        let mut prev = 0u8;
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut bytes = Vec::with_capacity(n + 16);
                    normalize_newlines(&buf[..n], &mut prev, &mut bytes);
                    let _ = events.send(CoreEvent::PtyData {
                        session: id,
                        kind,
                        backend: PtyBackend::Pipe,
                        bytes,
                    });
                }
            }
        }
    })
}

/// Waits for both output readers to drain, then reaps the child and emits
/// the session's single exit event.
fn spawn_exit_watcher(
    id: PtySessionId,
    kind: SessionKind,
    child: Arc<Mutex<Child>>,
    readers: Vec<std::thread::JoinHandle<()>>,
    events: UnboundedSender<CoreEvent>,
    alive: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        for reader in readers {
            let _ = reader.join();
        }

        let code = loop {
            match child.lock().try_wait() {
                Ok(Some(status)) => break status.code().unwrap_or(-1),
                Ok(None) => {}
                Err(_) => break -1,
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        alive.store(false, Ordering::Release);
        log::info!("pty {}: pipe child exited with code {}", id, code);
        let _ = events.send(CoreEvent::PtyExit {
            session: id,
            kind,
            code,
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_newlines_inserts_cr() {
        let mut out = Vec::new();
        let mut prev = 0u8;
        normalize_newlines(b"a\nb", &mut prev, &mut out);
        assert_eq!(out, b"a\r\nb");
    }

    #[test]
    fn test_normalize_newlines_keeps_existing_crlf() {
        let mut out = Vec::new();
        let mut prev = 0u8;
        normalize_newlines(b"a\r\nb\n", &mut prev, &mut out);
        assert_eq!(out, b"a\r\nb\r\n");
    }

    #[test]
    fn test_normalize_newlines_across_chunks() {
        let mut out = Vec::new();
        let mut prev = 0u8;
        normalize_newlines(b"a\r", &mut prev, &mut out);
        normalize_newlines(b"\nb", &mut prev, &mut out);
        assert_eq!(out, b"a\r\nb");
    }
}
