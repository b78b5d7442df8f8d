//! Per-control-session state machine.
//!
//! One controller per `tmux -CC` child. It owns that child's byte stream:
//! frames it into lines, correlates `%begin`/`%end` transactions (strict
//! FIFO, one in flight, 5 s deadline), sniffs bootstrap marker lines,
//! dispatches notifications, reconciles tmux windows into native tabs and
//! tmux layouts into native layout trees, and hydrates freshly bound
//! panes' scrollback.
//!
//! The controller never sleeps and never does I/O beyond its control
//! link: timers are deadlines the workspace pump polls, and slow work
//! (out-of-band captures, retry waits) is described as [`ControllerJob`]s
//! the pump executes, completing back in through `on_*` methods.

use crate::ids::{ControlSessionId, PaneId, PtySessionId, TabId};
use crate::layout::{LayoutNode, SplitDirection};
use crate::pty::SessionHandle;
use crate::pty::shell::clamp_size;
use crate::tmux::capture::normalize_history;
use crate::tmux::commands::{PANE_MARKER, SOCKET_MARKER, TmuxCommand, WINDOW_MARKER};
use crate::tmux::event::TmuxNotification;
use crate::tmux::layout::{TmuxLayout, TmuxLayoutNode};
use crate::tmux::types::{TmuxPaneId, TmuxWindowId};
use crate::workspace::tab::{PaneKind, PaneState, PaneWriters, TabSet, TabState};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

/// Cap on buffered early output per tmux pane.
const BOOTSTRAP_CAP: usize = 512 * 1024;
/// Interval and bound for waiting on the socket path before hydrating.
pub(crate) const SOCKET_WAIT_INTERVAL: Duration = Duration::from_millis(150);
const SOCKET_WAIT_MAX: u8 = 10;
/// Interval and bound for retrying an empty capture.
const CAPTURE_RETRY_INTERVAL: Duration = Duration::from_millis(250);
const CAPTURE_RETRY_MAX: u8 = 4;

/// Writable side of the control PTY, as the controller sees it.
///
/// The production implementation is a [`SessionHandle`]; tests substitute
/// a recorder.
pub trait ControlLink: Send {
    /// Write raw bytes to the control PTY.
    fn write(&self, bytes: &[u8]) -> bool;
    /// Resize the control PTY itself.
    fn resize(&self, cols: u16, rows: u16) -> bool;
}

impl ControlLink for SessionHandle {
    fn write(&self, bytes: &[u8]) -> bool {
        SessionHandle::write(self, bytes)
    }

    fn resize(&self, cols: u16, rows: u16) -> bool {
        SessionHandle::resize(self, cols, rows)
    }
}

/// Connection lifecycle, host-queryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Control command written, waiting for the session to announce itself.
    Initiating,
    /// `%session-changed` received; fully connected.
    Connected,
    /// Control child gone or torn down.
    Ended,
}

/// Where a tmux pane lives natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneBinding {
    pub tab: TabId,
    pub pane: PaneId,
}

/// Asynchronous work the pump performs on the controller's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerJob {
    /// Sleep one socket-wait interval, then call back `on_hydration_tick`.
    WaitSocket { pane: TmuxPaneId },
    /// After `delay`, run an out-of-band capture and call back
    /// `on_hydration_result`.
    Capture {
        pane: TmuxPaneId,
        socket: PathBuf,
        delay: Duration,
    },
    /// Capture a pane's history ahead of binding; calls back
    /// `on_prefetch_result`.
    Prefetch { pane: TmuxPaneId, socket: PathBuf },
}

/// What resolves when a transaction completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureKind {
    /// Bootstrap command; its payload is consumed line-by-line by the
    /// marker sniffers, so resolution itself is a no-op.
    Bootstrap,
    /// In-band history capture for a pane (last-resort hydration).
    History(TmuxPaneId),
}

struct CaptureRequest {
    command: TmuxCommand,
    kind: CaptureKind,
}

struct ActiveTransaction {
    kind: CaptureKind,
    collecting: bool,
    lines: Vec<String>,
    deadline: Instant,
}

struct BootstrapBuffer {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
    deadline: Instant,
}

#[derive(Default)]
struct HydrationState {
    socket_waits: u8,
    attempts: u8,
    resolved: bool,
}

/// State machine for one tmux control-mode connection.
pub struct TmuxController {
    id: ControlSessionId,
    pty_session: PtySessionId,
    link: Box<dyn ControlLink>,
    transaction_timeout: Duration,
    bootstrap_deadline: Duration,

    phase: ControllerPhase,
    session_name: Option<String>,
    socket_path: Option<PathBuf>,

    line_buffer: Vec<u8>,
    window_to_tab: HashMap<TmuxWindowId, TabId>,
    pane_to_native: HashMap<TmuxPaneId, PaneBinding>,

    queue: VecDeque<CaptureRequest>,
    active: Option<ActiveTransaction>,

    prefetched: HashMap<TmuxPaneId, Vec<u8>>,
    bootstrap: HashMap<TmuxPaneId, BootstrapBuffer>,
    hydration: HashMap<TmuxPaneId, HydrationState>,

    last_client_size: Option<(u16, u16)>,
    jobs: Vec<ControllerJob>,
}

impl TmuxController {
    pub fn new(
        id: ControlSessionId,
        pty_session: PtySessionId,
        link: Box<dyn ControlLink>,
        transaction_timeout: Duration,
        bootstrap_deadline: Duration,
    ) -> Self {
        Self {
            id,
            pty_session,
            link,
            transaction_timeout,
            bootstrap_deadline,
            phase: ControllerPhase::Initiating,
            session_name: None,
            socket_path: None,
            line_buffer: Vec::new(),
            window_to_tab: HashMap::new(),
            pane_to_native: HashMap::new(),
            queue: VecDeque::new(),
            active: None,
            prefetched: HashMap::new(),
            bootstrap: HashMap::new(),
            hydration: HashMap::new(),
            last_client_size: None,
            jobs: Vec::new(),
        }
    }

    pub fn id(&self) -> ControlSessionId {
        self.id
    }

    pub fn pty_session(&self) -> PtySessionId {
        self.pty_session
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn session_name(&self) -> Option<&str> {
        self.session_name.as_deref()
    }

    pub fn socket_path(&self) -> Option<&PathBuf> {
        self.socket_path.as_ref()
    }

    /// Native binding of a tmux pane, if any.
    pub fn binding_for(&self, pane: TmuxPaneId) -> Option<PaneBinding> {
        self.pane_to_native.get(&pane).copied()
    }

    /// Tab bound to a tmux window, if any.
    pub fn tab_for_window(&self, window: TmuxWindowId) -> Option<TabId> {
        self.window_to_tab.get(&window).copied()
    }

    /// Kick off the bootstrap command sequence. The socket probe always
    /// goes first so its answer is available to the pane prefetches.
    pub fn start(&mut self) {
        self.enqueue(TmuxCommand::socket_probe(), CaptureKind::Bootstrap);
        self.enqueue(TmuxCommand::list_panes_probe(), CaptureKind::Bootstrap);
        self.enqueue(TmuxCommand::list_windows_probe(), CaptureKind::Bootstrap);
    }

    /// Drain asynchronous work for the pump.
    pub fn take_jobs(&mut self) -> Vec<ControllerJob> {
        std::mem::take(&mut self.jobs)
    }

    /// Earliest deadline the pump must wake us for.
    pub fn next_deadline(&self) -> Option<Instant> {
        let txn = self.active.as_ref().map(|txn| txn.deadline);
        let bootstrap = self.bootstrap.values().map(|buf| buf.deadline).min();
        match (txn, bootstrap) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Expire overdue transactions and bootstrap buffers.
    pub fn on_deadline(&mut self, now: Instant, writers: &mut PaneWriters) {
        if let Some(txn) = &self.active
            && txn.deadline <= now
        {
            log::warn!("tmux {}: transaction timed out", self.id);
            self.resolve_active(String::new(), writers);
        }

        let overdue: Vec<TmuxPaneId> = self
            .bootstrap
            .iter()
            .filter(|(_, buf)| buf.deadline <= now)
            .map(|(pane, _)| *pane)
            .collect();
        for pane in overdue {
            log::debug!("tmux {}: bootstrap deadline for {}", self.id, pane);
            self.give_up_hydration(pane, writers);
        }
    }

    // =========================================================================
    // Byte stream
    // =========================================================================

    /// Feed bytes from the control PTY. Complete lines are processed; the
    /// trailing partial stays buffered.
    pub fn process_bytes(&mut self, bytes: &[u8], tabs: &mut TabSet, writers: &mut PaneWriters) {
        self.line_buffer.extend_from_slice(bytes);

        while let Some(pos) = self.line_buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.line_buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line, tabs, writers);
        }
    }

    fn process_line(&mut self, line: &str, tabs: &mut TabSet, writers: &mut PaneWriters) {
        // 1. Active transaction.
        if self.active.is_some() {
            if line.starts_with("%begin") {
                if let Some(txn) = self.active.as_mut() {
                    txn.collecting = true;
                }
                return;
            }
            if line.starts_with("%end") {
                let body = self
                    .active
                    .as_mut()
                    .map(|txn| std::mem::take(&mut txn.lines).join("\n"))
                    .unwrap_or_default();
                self.resolve_active(body, writers);
                return;
            }
            if line.starts_with("%error") {
                self.resolve_active(String::new(), writers);
                return;
            }
            let collecting = self.active.as_ref().is_some_and(|txn| txn.collecting);
            if collecting && !line.starts_with('%') {
                // 2. Bootstrap sniffers see response bodies first.
                if !self.try_sniff(line, tabs, writers)
                    && let Some(txn) = self.active.as_mut()
                {
                    txn.lines.push(line.to_string());
                }
                return;
            }
            // %-notifications interleave freely inside transactions; fall
            // through to the event parser.
        } else if !line.starts_with('%') && self.try_sniff(line, tabs, writers) {
            return;
        }

        // 3. Event parser.
        self.dispatch(TmuxNotification::parse(line), tabs, writers);
    }

    // =========================================================================
    // Bootstrap sniffers
    // =========================================================================

    /// Consume `__SOCKET__` / `__PANE__` / `__WINDOW__` marker lines.
    fn try_sniff(&mut self, line: &str, tabs: &mut TabSet, writers: &mut PaneWriters) -> bool {
        if let Some(rest) = strip_marker(line, SOCKET_MARKER) {
            let path = rest.trim();
            if !path.is_empty() {
                log::info!("tmux {}: server socket at {}", self.id, path);
                self.socket_path = Some(PathBuf::from(path));
            }
            return true;
        }

        if let Some(rest) = strip_marker(line, PANE_MARKER) {
            if let Some((_window, pane)) = rest.split_once("::")
                && let Ok(pane) = pane.trim().parse::<TmuxPaneId>()
            {
                if let Some(socket) = &self.socket_path {
                    if !self.prefetched.contains_key(&pane) {
                        self.jobs.push(ControllerJob::Prefetch {
                            pane,
                            socket: socket.clone(),
                        });
                    }
                } else {
                    log::debug!("tmux {}: no socket yet, skipping prefetch of {}", self.id, pane);
                }
            }
            return true;
        }

        if let Some(rest) = strip_marker(line, WINDOW_MARKER) {
            if let Some((window, rest)) = rest.split_once("::")
                && let Ok(window) = window.trim().parse::<TmuxWindowId>()
                && let Some((name, layout)) = rest.rsplit_once("::")
            {
                let name = name.to_string();
                let layout = layout.to_string();
                self.apply_layout(window, &layout, Some(name), tabs, writers);
            }
            return true;
        }

        false
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    fn dispatch(
        &mut self,
        notification: TmuxNotification,
        tabs: &mut TabSet,
        writers: &mut PaneWriters,
    ) {
        match notification {
            TmuxNotification::Output { pane, data } => self.handle_output(pane, &data, writers),
            TmuxNotification::WindowAdd { window } => {
                log::info!("tmux {}: window add {}", self.id, window);
                // Placeholder layout until the first %layout-change.
                self.apply_layout(window, "80x24,0,0,0", None, tabs, writers);
            }
            TmuxNotification::WindowClose { window } => {
                log::info!("tmux {}: window close {}", self.id, window);
                self.close_window(window, tabs, writers);
            }
            TmuxNotification::WindowRenamed { window, name } => {
                if let Some(tab_id) = self.tab_for_window(window)
                    && let Some(tab) = tabs.get_mut(tab_id)
                {
                    tab.title = name;
                }
            }
            TmuxNotification::LayoutChange { window, layout } => {
                self.apply_layout(window, &layout, None, tabs, writers);
            }
            TmuxNotification::WindowPaneChanged { window, pane } => {
                if let Some(tab_id) = self.tab_for_window(window)
                    && let Some(binding) = self.binding_for(pane)
                    && binding.tab == tab_id
                    && let Some(tab) = tabs.get_mut(tab_id)
                {
                    tab.active_pane = binding.pane;
                }
            }
            TmuxNotification::SessionChanged { name } => {
                log::info!("tmux {}: session '{}'", self.id, name);
                self.session_name = Some(name);
                self.phase = ControllerPhase::Connected;
            }
            TmuxNotification::Error { message } => {
                log::warn!("tmux {}: %error: {}", self.id, message);
            }
            TmuxNotification::Begin | TmuxNotification::End => {
                // Response framing with no transaction of ours in flight
                // (e.g. the initial new-session banner). Nothing to do.
            }
            TmuxNotification::Other { line } => {
                if !line.is_empty() {
                    log::trace!("tmux {}: unhandled line: {}", self.id, line);
                }
            }
        }
    }

    fn handle_output(&mut self, pane: TmuxPaneId, data: &[u8], writers: &mut PaneWriters) {
        let Some(binding) = self.binding_for(pane) else {
            log::trace!("tmux {}: output for unbound pane {}", self.id, pane);
            return;
        };
        let data = strip_erase_scrollback(data);
        if data.is_empty() {
            return;
        }

        if let Some(buffer) = self.bootstrap.get_mut(&pane) {
            buffer.bytes += data.len();
            buffer.chunks.push_back(data);
            while buffer.bytes > BOOTSTRAP_CAP && buffer.chunks.len() > 1 {
                if let Some(evicted) = buffer.chunks.pop_front() {
                    buffer.bytes -= evicted.len();
                }
            }
            if buffer.bytes > BOOTSTRAP_CAP {
                // A single chunk larger than the cap: stop buffering.
                self.give_up_hydration(pane, writers);
            }
        } else {
            writers.write(binding.pane, &data);
        }
    }

    // =========================================================================
    // Layout reconciliation
    // =========================================================================

    /// Install a tmux layout into the tab bound to `window`, allocating
    /// the tab and any panes on first sight.
    pub(crate) fn apply_layout(
        &mut self,
        window: TmuxWindowId,
        layout_str: &str,
        title: Option<String>,
        tabs: &mut TabSet,
        writers: &mut PaneWriters,
    ) {
        let parsed = TmuxLayout::try_parse(layout_str).unwrap_or_else(|| {
            log::warn!(
                "tmux {}: unparseable layout for {}: {:?}",
                self.id,
                window,
                layout_str
            );
            TmuxLayout::fallback()
        });

        let tab_id = *self
            .window_to_tab
            .entry(window)
            .or_insert_with(TabId::new);

        // Build the native tree, binding tmux panes as we go.
        let mut fresh = Vec::new();
        let native = self.bind_layout_node(&parsed.root, tab_id, &mut fresh);

        // Remove bindings this window no longer has.
        let live: HashSet<TmuxPaneId> = parsed.pane_ids().into_iter().collect();
        let stale: Vec<TmuxPaneId> = self
            .pane_to_native
            .iter()
            .filter(|(tmux_pane, binding)| binding.tab == tab_id && !live.contains(tmux_pane))
            .map(|(tmux_pane, _)| *tmux_pane)
            .collect();
        for tmux_pane in stale {
            if let Some(binding) = self.pane_to_native.remove(&tmux_pane) {
                log::debug!(
                    "tmux {}: pane {} left window {}",
                    self.id,
                    tmux_pane,
                    window
                );
                writers.remove(binding.pane);
            }
            self.bootstrap.remove(&tmux_pane);
            self.hydration.remove(&tmux_pane);
            self.prefetched.remove(&tmux_pane);
        }

        // Assemble the pane map, carrying view sizes across.
        let previous = tabs.get(tab_id);
        let mut panes: HashMap<PaneId, PaneState> = HashMap::new();
        for tmux_pane in &live {
            let Some(binding) = self.pane_to_native.get(tmux_pane).copied() else {
                continue;
            };
            let mut state = PaneState::new(
                binding.pane,
                PaneKind::Tmux {
                    tmux_pane: *tmux_pane,
                    control_session: self.id,
                },
            );
            if let Some(prev) = previous.and_then(|tab| tab.panes.get(&binding.pane)) {
                state.view_size = prev.view_size;
            }
            panes.insert(binding.pane, state);
        }

        let active_pane = previous
            .map(|tab| tab.active_pane)
            .filter(|pane| panes.contains_key(pane))
            .or_else(|| native.collect_panes().first().copied());
        let Some(active_pane) = active_pane else {
            log::warn!("tmux {}: layout for {} has no panes", self.id, window);
            return;
        };

        let merged = match previous {
            Some(prev) => LayoutNode::preserve_ratios(&prev.layout, native),
            None => native,
        };
        let title = title
            .or_else(|| previous.map(|tab| tab.title.clone()))
            .unwrap_or_else(|| format!("tmux {window}"));

        let tab = TabState {
            id: tab_id,
            title,
            layout: merged,
            panes,
            active_pane,
            tmux_window: Some(window),
            control_session: Some(self.id),
        };
        // TabSet::insert replaces in place, keeping display order.
        tabs.insert(tab);

        for pane in fresh {
            self.schedule_hydration(pane, writers);
        }

        if tabs.active_id() == Some(tab_id) {
            self.sync_client_size(tabs);
        }
    }

    /// Map the parsed tmux tree onto native panes, allocating fresh ones
    /// (and their bootstrap state) on first sight.
    fn bind_layout_node(
        &mut self,
        node: &TmuxLayoutNode,
        tab_id: TabId,
        fresh: &mut Vec<TmuxPaneId>,
    ) -> LayoutNode {
        match node {
            TmuxLayoutNode::Pane(tmux_pane) => {
                let reusable = self
                    .pane_to_native
                    .get(tmux_pane)
                    .filter(|binding| binding.tab == tab_id);
                match reusable {
                    Some(binding) => LayoutNode::Pane(binding.pane),
                    None => {
                        let pane = PaneId::new();
                        self.pane_to_native
                            .insert(*tmux_pane, PaneBinding { tab: tab_id, pane });
                        self.bootstrap.insert(
                            *tmux_pane,
                            BootstrapBuffer {
                                chunks: VecDeque::new(),
                                bytes: 0,
                                deadline: Instant::now() + self.bootstrap_deadline,
                            },
                        );
                        self.hydration.insert(*tmux_pane, HydrationState::default());
                        fresh.push(*tmux_pane);
                        log::debug!("tmux {}: bound {} -> pane {}", self.id, tmux_pane, pane);
                        LayoutNode::Pane(pane)
                    }
                }
            }
            TmuxLayoutNode::Split {
                direction,
                ratio,
                first,
                second,
            } => LayoutNode::split(
                *direction,
                *ratio,
                self.bind_layout_node(first, tab_id, fresh),
                self.bind_layout_node(second, tab_id, fresh),
            ),
        }
    }

    fn close_window(&mut self, window: TmuxWindowId, tabs: &mut TabSet, writers: &mut PaneWriters) {
        let Some(tab_id) = self.window_to_tab.remove(&window) else {
            return;
        };
        tabs.remove(tab_id);

        let bound: Vec<TmuxPaneId> = self
            .pane_to_native
            .iter()
            .filter(|(_, binding)| binding.tab == tab_id)
            .map(|(tmux_pane, _)| *tmux_pane)
            .collect();
        for tmux_pane in bound {
            if let Some(binding) = self.pane_to_native.remove(&tmux_pane) {
                writers.remove(binding.pane);
            }
            self.bootstrap.remove(&tmux_pane);
            self.hydration.remove(&tmux_pane);
            self.prefetched.remove(&tmux_pane);
        }
    }

    /// Tear down every tab and binding this controller owns (control PTY
    /// exited or the host disconnected).
    pub fn teardown(&mut self, tabs: &mut TabSet, writers: &mut PaneWriters) {
        for tab_id in tabs.tabs_of_control(self.id) {
            tabs.remove(tab_id);
        }
        for (_, binding) in self.pane_to_native.drain() {
            writers.remove(binding.pane);
        }
        self.window_to_tab.clear();
        self.bootstrap.clear();
        self.hydration.clear();
        self.prefetched.clear();
        self.queue.clear();
        self.active = None;
        self.jobs.clear();
        self.phase = ControllerPhase::Ended;
    }

    // =========================================================================
    // History hydration
    // =========================================================================

    fn schedule_hydration(&mut self, pane: TmuxPaneId, writers: &mut PaneWriters) {
        if let Some(history) = self.prefetched.remove(&pane) {
            self.flush_with_history(pane, history, writers);
            return;
        }
        match &self.socket_path {
            Some(socket) => self.jobs.push(ControllerJob::Capture {
                pane,
                socket: socket.clone(),
                delay: Duration::ZERO,
            }),
            None => self.jobs.push(ControllerJob::WaitSocket { pane }),
        }
    }

    /// One socket-wait interval elapsed for `pane`.
    pub fn on_hydration_tick(&mut self, pane: TmuxPaneId, _writers: &mut PaneWriters) {
        let Some(state) = self.hydration.get_mut(&pane) else {
            return;
        };
        if state.resolved {
            return;
        }

        if let Some(socket) = &self.socket_path {
            self.jobs.push(ControllerJob::Capture {
                pane,
                socket: socket.clone(),
                delay: Duration::ZERO,
            });
            return;
        }

        state.socket_waits += 1;
        if state.socket_waits >= SOCKET_WAIT_MAX {
            // Still no socket; fall back to an in-band capture.
            log::debug!("tmux {}: no socket path, capturing {} in-band", self.id, pane);
            self.enqueue(TmuxCommand::capture_pane(pane), CaptureKind::History(pane));
        } else {
            self.jobs.push(ControllerJob::WaitSocket { pane });
        }
    }

    /// An out-of-band capture for `pane` finished.
    pub fn on_hydration_result(
        &mut self,
        pane: TmuxPaneId,
        history: Option<Vec<u8>>,
        writers: &mut PaneWriters,
    ) {
        let Some(state) = self.hydration.get_mut(&pane) else {
            return;
        };
        if state.resolved {
            return;
        }

        if let Some(history) = history {
            self.flush_with_history(pane, history, writers);
            return;
        }

        state.attempts += 1;
        if state.attempts >= CAPTURE_RETRY_MAX {
            self.give_up_hydration(pane, writers);
        } else if let Some(socket) = &self.socket_path {
            self.jobs.push(ControllerJob::Capture {
                pane,
                socket: socket.clone(),
                delay: CAPTURE_RETRY_INTERVAL,
            });
        } else {
            self.give_up_hydration(pane, writers);
        }
    }

    /// A bootstrap prefetch finished.
    pub fn on_prefetch_result(
        &mut self,
        pane: TmuxPaneId,
        history: Vec<u8>,
        writers: &mut PaneWriters,
    ) {
        let awaiting = self
            .hydration
            .get(&pane)
            .is_some_and(|state| !state.resolved);
        if awaiting && self.pane_to_native.contains_key(&pane) {
            self.flush_with_history(pane, history, writers);
        } else {
            self.prefetched.insert(pane, history);
        }
    }

    /// Captured history wins: write it, drop the now-redundant bootstrap
    /// chunks.
    fn flush_with_history(&mut self, pane: TmuxPaneId, history: Vec<u8>, writers: &mut PaneWriters) {
        let Some(binding) = self.binding_for(pane) else {
            self.prefetched.insert(pane, history);
            return;
        };
        if let Some(state) = self.hydration.get_mut(&pane) {
            if state.resolved {
                return;
            }
            state.resolved = true;
        }
        writers.write(binding.pane, &history);
        self.bootstrap.remove(&pane);
        log::debug!(
            "tmux {}: hydrated {} ({} bytes)",
            self.id,
            pane,
            history.len()
        );
    }

    /// No capture available: the buffered early output is all there is.
    fn give_up_hydration(&mut self, pane: TmuxPaneId, writers: &mut PaneWriters) {
        if let Some(state) = self.hydration.get_mut(&pane) {
            if state.resolved {
                return;
            }
            state.resolved = true;
        }
        let Some(buffer) = self.bootstrap.remove(&pane) else {
            return;
        };
        if let Some(binding) = self.binding_for(pane) {
            for chunk in buffer.chunks {
                writers.write(binding.pane, &chunk);
            }
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    fn enqueue(&mut self, command: TmuxCommand, kind: CaptureKind) {
        self.queue.push_back(CaptureRequest { command, kind });
        self.pump_queue();
    }

    /// Start the next queued request when nothing is in flight. Exactly
    /// one command write per request, ever.
    fn pump_queue(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(request) = self.queue.pop_front() else {
            return;
        };
        if !self.link.write(&request.command.as_bytes()) {
            log::warn!(
                "tmux {}: control write failed for '{}'",
                self.id,
                request.command.as_str()
            );
        }
        self.active = Some(ActiveTransaction {
            kind: request.kind,
            collecting: false,
            lines: Vec::new(),
            deadline: Instant::now() + self.transaction_timeout,
        });
    }

    fn resolve_active(&mut self, body: String, writers: &mut PaneWriters) {
        let Some(txn) = self.active.take() else {
            return;
        };
        match txn.kind {
            CaptureKind::Bootstrap => {}
            CaptureKind::History(pane) => {
                if body.trim().is_empty() {
                    self.give_up_hydration(pane, writers);
                } else {
                    self.flush_with_history(pane, normalize_history(body.as_bytes()), writers);
                }
            }
        }
        self.pump_queue();
    }

    // =========================================================================
    // Outgoing commands
    // =========================================================================

    fn write_command(&self, command: TmuxCommand) {
        if !self.link.write(&command.as_bytes()) {
            log::warn!(
                "tmux {}: dropped command '{}'",
                self.id,
                command.as_str()
            );
        }
    }

    /// Forward user keystrokes to a pane. Empty input is not sent.
    pub fn send_keys(&self, pane: TmuxPaneId, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.write_command(TmuxCommand::send_keys_hex(pane, bytes));
    }

    pub fn split_pane(&self, pane: TmuxPaneId, direction: SplitDirection) {
        self.write_command(TmuxCommand::split_window(
            pane,
            direction == SplitDirection::Horizontal,
        ));
    }

    pub fn kill_pane(&self, pane: TmuxPaneId) {
        self.write_command(TmuxCommand::kill_pane(pane));
    }

    pub fn kill_window(&self, window: TmuxWindowId) {
        self.write_command(TmuxCommand::kill_window(window));
    }

    pub fn detach(&self) {
        self.write_command(TmuxCommand::detach_client());
    }

    pub fn select_window(&self, window: TmuxWindowId) {
        self.write_command(TmuxCommand::select_window(window));
    }

    pub fn select_pane(&self, pane: TmuxPaneId) {
        self.write_command(TmuxCommand::select_pane(pane));
    }

    /// Push one pane's new size to tmux.
    pub fn resize_pane(&self, pane: TmuxPaneId, cols: u16, rows: u16) {
        let (cols, rows) = clamp_size(cols, rows);
        self.write_command(TmuxCommand::resize_pane(pane, cols, rows));
    }

    // =========================================================================
    // Client-size sync
    // =========================================================================

    /// Keep the control client's virtual screen matched to the composite
    /// grid of the active tab. Only emits when the size actually changed.
    pub fn sync_client_size(&mut self, tabs: &TabSet) {
        let Some(tab) = tabs.active_tab() else {
            return;
        };
        if tab.control_session != Some(self.id) {
            return;
        }

        let (cols, rows) = composite_size(&tab.layout, &tab.panes);
        let (cols, rows) = clamp_size(
            cols.min(u16::MAX as u32) as u16,
            rows.min(u16::MAX as u32) as u16,
        );
        if self.last_client_size == Some((cols, rows)) {
            return;
        }
        self.last_client_size = Some((cols, rows));

        log::debug!("tmux {}: client size {}x{}", self.id, cols, rows);
        self.link.resize(cols, rows);
        self.write_command(TmuxCommand::set_client_size(cols, rows));
    }
}

/// Composite grid of a layout from per-pane view sizes: side-by-side sums
/// columns and takes the max of rows; stacked is the transpose. Panes the
/// renderer has not sized yet count as 80x24.
fn composite_size(
    node: &LayoutNode,
    panes: &HashMap<PaneId, PaneState>,
) -> (u32, u32) {
    match node {
        LayoutNode::Pane(id) => {
            let (cols, rows) = panes
                .get(id)
                .and_then(|pane| pane.view_size)
                .unwrap_or((80, 24));
            (cols as u32, rows as u32)
        }
        LayoutNode::Split {
            direction,
            first,
            second,
            ..
        } => {
            let (c1, r1) = composite_size(first, panes);
            let (c2, r2) = composite_size(second, panes);
            match direction {
                SplitDirection::Horizontal => (c1 + c2, r1.max(r2)),
                SplitDirection::Vertical => (c1.max(c2), r1 + r2),
            }
        }
    }
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker)?.strip_prefix("::")
}

/// Remove ED-3 "erase scrollback" sequences, which would destroy the
/// history we just hydrated.
fn strip_erase_scrollback(data: &[u8]) -> Vec<u8> {
    const PLAIN: &[u8] = b"\x1b[3J";
    const PRIVATE: &[u8] = b"\x1b[?3J";

    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(PRIVATE) {
            i += PRIVATE.len();
        } else if data[i..].starts_with(PLAIN) {
            i += PLAIN.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every control-PTY write and resize.
    #[derive(Clone, Default)]
    struct RecordingLink {
        writes: Arc<Mutex<Vec<String>>>,
        resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    }

    impl ControlLink for RecordingLink {
        fn write(&self, bytes: &[u8]) -> bool {
            self.writes
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
            true
        }

        fn resize(&self, cols: u16, rows: u16) -> bool {
            self.resizes.lock().unwrap().push((cols, rows));
            true
        }
    }

    struct Fixture {
        controller: TmuxController,
        tabs: TabSet,
        writers: PaneWriters,
        link: RecordingLink,
    }

    fn fixture() -> Fixture {
        let link = RecordingLink::default();
        let controller = TmuxController::new(
            ControlSessionId::new(),
            PtySessionId::new(),
            Box::new(link.clone()),
            Duration::from_secs(5),
            Duration::from_secs(15),
        );
        Fixture {
            controller,
            tabs: TabSet::new(),
            writers: PaneWriters::new(),
            link,
        }
    }

    fn recording_pane_writer(
        writers: &mut PaneWriters,
        pane: PaneId,
    ) -> Arc<Mutex<Vec<u8>>> {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let writer_sink = Arc::clone(&sink);
        writers.register(
            pane,
            Box::new(move |bytes: &[u8]| {
                writer_sink.lock().unwrap().extend_from_slice(bytes);
            }),
        );
        sink
    }

    fn feed(fx: &mut Fixture, bytes: &[u8]) {
        let Fixture {
            controller,
            tabs,
            writers,
            ..
        } = fx;
        controller.process_bytes(bytes, tabs, writers);
    }

    #[test]
    fn test_transaction_fifo_one_write_per_request() {
        let mut fx = fixture();
        let (p4, p5) = (TmuxPaneId(4), TmuxPaneId(5));

        // Bind both panes so history resolution has somewhere to land.
        fx.controller
            .apply_layout(TmuxWindowId(1), "120x30,0,0{60x30,0,0,4,60x30,61,0,5}", None, &mut fx.tabs, &mut fx.writers);
        let sink4 =
            recording_pane_writer(&mut fx.writers, fx.controller.binding_for(p4).unwrap().pane);
        let sink5 =
            recording_pane_writer(&mut fx.writers, fx.controller.binding_for(p5).unwrap().pane);
        fx.link.writes.lock().unwrap().clear();

        fx.controller
            .enqueue(TmuxCommand::capture_pane(p4), CaptureKind::History(p4));
        fx.controller
            .enqueue(TmuxCommand::capture_pane(p5), CaptureKind::History(p5));

        // Only the head request has been written.
        assert_eq!(fx.link.writes.lock().unwrap().len(), 1);

        feed(&mut fx, b"%begin 1\ndataA\n%end 1\n%begin 2\ndataB\n%end 2\n");

        let writes = fx.link.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 2);
        assert!(writes[0].contains("-t %4"));
        assert!(writes[1].contains("-t %5"));
        assert_eq!(sink4.lock().unwrap().as_slice(), b"dataA\r\n");
        assert_eq!(sink5.lock().unwrap().as_slice(), b"dataB\r\n");
    }

    #[test]
    fn test_transaction_error_resolves_empty() {
        let mut fx = fixture();
        let pane = TmuxPaneId(7);
        fx.controller
            .apply_layout(TmuxWindowId(1), "80x24,0,0,7", None, &mut fx.tabs, &mut fx.writers);
        let native = fx.controller.binding_for(pane).unwrap().pane;
        let sink = recording_pane_writer(&mut fx.writers, native);

        // Early output lands in the bootstrap buffer.
        feed(&mut fx, b"%output %7 early\n");

        fx.controller
            .enqueue(TmuxCommand::capture_pane(pane), CaptureKind::History(pane));
        feed(&mut fx, b"%begin 1\n%error 1\n");

        // Empty resolution falls back to the buffered bytes.
        assert_eq!(sink.lock().unwrap().as_slice(), b"early");
    }

    #[test]
    fn test_transaction_timeout_advances_queue() {
        let mut fx = fixture();
        fx.controller.start();
        assert_eq!(fx.link.writes.lock().unwrap().len(), 1);

        let later = Instant::now() + Duration::from_secs(6);
        fx.controller.on_deadline(later, &mut fx.writers);
        // Head expired; the next bootstrap command went out.
        assert_eq!(fx.link.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_bootstrap_sniffers() {
        let mut fx = fixture();
        fx.controller.start();

        feed(
            &mut fx,
            b"%begin 1\n__SOCKET__::/tmp/tmux-1000/default\n%end 1\n",
        );
        assert_eq!(
            fx.controller.socket_path(),
            Some(&PathBuf::from("/tmp/tmux-1000/default"))
        );

        feed(&mut fx, b"%begin 2\n__PANE__::@1::%0\n%end 2\n");
        let jobs = fx.controller.take_jobs();
        assert!(jobs.iter().any(|job| matches!(
            job,
            ControllerJob::Prefetch { pane, .. } if *pane == TmuxPaneId(0)
        )));

        feed(
            &mut fx,
            b"%begin 3\n__WINDOW__::@1::build::80x24,0,0,0\n%end 3\n",
        );
        let tab_id = fx.controller.tab_for_window(TmuxWindowId(1)).unwrap();
        let tab = fx.tabs.get(tab_id).unwrap();
        assert_eq!(tab.title, "build");
        assert_eq!(tab.panes.len(), 1);
        assert!(tab.is_tmux_bound());
    }

    #[test]
    fn test_window_add_creates_placeholder_tab() {
        let mut fx = fixture();
        feed(&mut fx, b"%window-add @2\n");
        let tab_id = fx.controller.tab_for_window(TmuxWindowId(2)).unwrap();
        let tab = fx.tabs.get(tab_id).unwrap();
        assert_eq!(tab.title, "tmux @2");
        assert_eq!(tab.layout.pane_count(), 1);
    }

    #[test]
    fn test_window_close_cleans_up_and_rename_retitles() {
        let mut fx = fixture();
        feed(&mut fx, b"%window-add @2\n");
        feed(&mut fx, b"%window-renamed @2 logs\n");
        let tab_id = fx.controller.tab_for_window(TmuxWindowId(2)).unwrap();
        assert_eq!(fx.tabs.get(tab_id).unwrap().title, "logs");

        feed(&mut fx, b"%window-close @2\n");
        assert!(fx.controller.tab_for_window(TmuxWindowId(2)).is_none());
        assert!(fx.tabs.is_empty());
        assert!(fx.controller.binding_for(TmuxPaneId(0)).is_none());
    }

    #[test]
    fn test_layout_change_preserves_user_ratio() {
        let mut fx = fixture();
        let window = TmuxWindowId(1);
        fx.controller.apply_layout(
            window,
            "120x30,0,0{60x30,0,0,1,60x30,61,0,2}",
            None,
            &mut fx.tabs,
            &mut fx.writers,
        );
        let tab_id = fx.controller.tab_for_window(window).unwrap();
        let p1 = fx.controller.binding_for(TmuxPaneId(1)).unwrap().pane;
        let p2 = fx.controller.binding_for(TmuxPaneId(2)).unwrap().pane;

        // User drags the divider to 0.7.
        fx.tabs
            .get_mut(tab_id)
            .unwrap()
            .layout
            .update_ratio_at(&[], 0.7);

        // tmux re-emits the same structure with its own 50/50 geometry.
        feed(
            &mut fx,
            b"%layout-change @1 120x30,0,0{60x30,0,0,1,60x30,61,0,2}\n",
        );

        let tab = fx.tabs.get(tab_id).unwrap();
        match &tab.layout {
            LayoutNode::Split {
                ratio,
                first,
                second,
                ..
            } => {
                assert!((ratio - 0.7).abs() < 1e-6);
                assert_eq!(first.as_ref(), &LayoutNode::Pane(p1));
                assert_eq!(second.as_ref(), &LayoutNode::Pane(p2));
            }
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn test_layout_change_drops_departed_pane() {
        let mut fx = fixture();
        let window = TmuxWindowId(1);
        fx.controller.apply_layout(
            window,
            "120x30,0,0{60x30,0,0,1,60x30,61,0,2}",
            None,
            &mut fx.tabs,
            &mut fx.writers,
        );
        let kept = fx.controller.binding_for(TmuxPaneId(1)).unwrap().pane;

        feed(&mut fx, b"%layout-change @1 120x30,0,0,1\n");

        assert!(fx.controller.binding_for(TmuxPaneId(2)).is_none());
        let tab_id = fx.controller.tab_for_window(window).unwrap();
        let tab = fx.tabs.get(tab_id).unwrap();
        assert_eq!(tab.layout, LayoutNode::Pane(kept));
        assert_eq!(tab.panes.len(), 1);
        assert_eq!(tab.active_pane, kept);
    }

    #[test]
    fn test_output_buffered_until_hydration_then_streams() {
        let mut fx = fixture();
        let pane = TmuxPaneId(3);
        fx.controller
            .apply_layout(TmuxWindowId(1), "80x24,0,0,3", None, &mut fx.tabs, &mut fx.writers);
        let native = fx.controller.binding_for(pane).unwrap().pane;
        let sink = recording_pane_writer(&mut fx.writers, native);

        feed(&mut fx, b"%output %3 buffered\n");
        assert!(sink.lock().unwrap().is_empty());

        fx.controller
            .on_hydration_result(pane, Some(b"history\r\n".to_vec()), &mut fx.writers);
        // Captured history replaces the buffered bytes entirely.
        assert_eq!(sink.lock().unwrap().as_slice(), b"history\r\n");

        feed(&mut fx, b"%output %3 live\n");
        assert_eq!(sink.lock().unwrap().as_slice(), b"history\r\nlive");
    }

    #[test]
    fn test_bootstrap_flush_happens_once() {
        let mut fx = fixture();
        let pane = TmuxPaneId(3);
        fx.controller
            .apply_layout(TmuxWindowId(1), "80x24,0,0,3", None, &mut fx.tabs, &mut fx.writers);
        let native = fx.controller.binding_for(pane).unwrap().pane;
        let sink = recording_pane_writer(&mut fx.writers, native);

        feed(&mut fx, b"%output %3 early\n");
        let later = Instant::now() + Duration::from_secs(16);
        fx.controller.on_deadline(later, &mut fx.writers);
        assert_eq!(sink.lock().unwrap().as_slice(), b"early");

        // A late capture result must not double-deliver.
        fx.controller
            .on_hydration_result(pane, Some(b"late\r\n".to_vec()), &mut fx.writers);
        assert_eq!(sink.lock().unwrap().as_slice(), b"early");
    }

    #[test]
    fn test_output_strips_erase_scrollback() {
        let mut fx = fixture();
        let pane = TmuxPaneId(3);
        fx.controller
            .apply_layout(TmuxWindowId(1), "80x24,0,0,3", None, &mut fx.tabs, &mut fx.writers);
        let native = fx.controller.binding_for(pane).unwrap().pane;
        let sink = recording_pane_writer(&mut fx.writers, native);
        fx.controller
            .on_hydration_result(pane, Some(Vec::new()), &mut fx.writers);
        sink.lock().unwrap().clear();

        feed(&mut fx, b"%output %3 a\\033[3Jb\\033[?3Jc\n");
        assert_eq!(sink.lock().unwrap().as_slice(), b"abc");
    }

    #[test]
    fn test_hydration_waits_for_socket_then_falls_back_in_band() {
        let mut fx = fixture();
        let pane = TmuxPaneId(9);
        fx.controller
            .apply_layout(TmuxWindowId(1), "80x24,0,0,9", None, &mut fx.tabs, &mut fx.writers);

        // No socket known: first job is a socket wait.
        let jobs = fx.controller.take_jobs();
        assert_eq!(jobs, vec![ControllerJob::WaitSocket { pane }]);

        // Exhaust the wait budget.
        for _ in 0..SOCKET_WAIT_MAX {
            fx.controller.on_hydration_tick(pane, &mut fx.writers);
            fx.controller.take_jobs();
        }

        // The controller switched to an in-band capture.
        let writes = fx.link.writes.lock().unwrap();
        assert!(
            writes
                .iter()
                .any(|w| w.contains("capture-pane") && w.contains("-t %9"))
        );
    }

    #[test]
    fn test_hydration_retry_budget() {
        let mut fx = fixture();
        let pane = TmuxPaneId(9);
        fx.controller
            .apply_layout(TmuxWindowId(1), "80x24,0,0,9", None, &mut fx.tabs, &mut fx.writers);
        let native = fx.controller.binding_for(pane).unwrap().pane;
        let sink = recording_pane_writer(&mut fx.writers, native);
        feed(&mut fx, b"%begin 1\n__SOCKET__::/tmp/sock\n%end 1\n");
        feed(&mut fx, b"%output %9 buffered\n");

        for _ in 0..CAPTURE_RETRY_MAX - 1 {
            fx.controller.on_hydration_result(pane, None, &mut fx.writers);
            let jobs = fx.controller.take_jobs();
            assert!(jobs.iter().any(|job| matches!(
                job,
                ControllerJob::Capture { delay, .. } if *delay == CAPTURE_RETRY_INTERVAL
            )));
        }

        // Final failure flushes the bootstrap buffer.
        fx.controller.on_hydration_result(pane, None, &mut fx.writers);
        assert_eq!(sink.lock().unwrap().as_slice(), b"buffered");
        assert!(fx.controller.take_jobs().is_empty());
    }

    #[test]
    fn test_prefetched_history_flushes_on_bind() {
        let mut fx = fixture();
        let pane = TmuxPaneId(2);
        fx.controller
            .on_prefetch_result(pane, b"prefetched\r\n".to_vec(), &mut fx.writers);

        fx.controller
            .apply_layout(TmuxWindowId(1), "80x24,0,0,2", None, &mut fx.tabs, &mut fx.writers);
        let native = fx.controller.binding_for(pane).unwrap().pane;
        let sink = recording_pane_writer(&mut fx.writers, native);

        // The prefetch was consumed at bind time; a pane writer registered
        // afterwards sees live output only.
        assert!(fx.controller.take_jobs().is_empty());
        feed(&mut fx, b"%output %2 live\n");
        assert_eq!(sink.lock().unwrap().as_slice(), b"live");
    }

    #[test]
    fn test_session_changed_connects() {
        let mut fx = fixture();
        assert_eq!(fx.controller.phase(), ControllerPhase::Initiating);
        feed(&mut fx, b"%session-changed $1 main\n");
        assert_eq!(fx.controller.phase(), ControllerPhase::Connected);
        assert_eq!(fx.controller.session_name(), Some("main"));
    }

    #[test]
    fn test_window_pane_changed_updates_active_pane() {
        let mut fx = fixture();
        fx.controller.apply_layout(
            TmuxWindowId(1),
            "120x30,0,0{60x30,0,0,1,60x30,61,0,2}",
            None,
            &mut fx.tabs,
            &mut fx.writers,
        );
        let tab_id = fx.controller.tab_for_window(TmuxWindowId(1)).unwrap();
        let p2 = fx.controller.binding_for(TmuxPaneId(2)).unwrap().pane;

        feed(&mut fx, b"%window-pane-changed @1 %2\n");
        assert_eq!(fx.tabs.get(tab_id).unwrap().active_pane, p2);
    }

    #[test]
    fn test_send_keys_hex_and_empty_skip() {
        let fx = fixture();
        fx.controller.send_keys(TmuxPaneId(1), b"");
        assert!(fx.link.writes.lock().unwrap().is_empty());

        fx.controller.send_keys(TmuxPaneId(1), b"hi");
        let writes = fx.link.writes.lock().unwrap();
        assert_eq!(writes[0], "send-keys -t %1 -H 68 69\n");
    }

    #[test]
    fn test_client_size_sync_composites_and_dedups() {
        let mut fx = fixture();
        fx.controller.apply_layout(
            TmuxWindowId(1),
            "120x30,0,0{60x30,0,0,1,60x30,61,0,2}",
            None,
            &mut fx.tabs,
            &mut fx.writers,
        );
        let tab_id = fx.controller.tab_for_window(TmuxWindowId(1)).unwrap();
        let p1 = fx.controller.binding_for(TmuxPaneId(1)).unwrap().pane;
        let p2 = fx.controller.binding_for(TmuxPaneId(2)).unwrap().pane;
        {
            let tab = fx.tabs.get_mut(tab_id).unwrap();
            tab.panes.get_mut(&p1).unwrap().view_size = Some((60, 30));
            tab.panes.get_mut(&p2).unwrap().view_size = Some((61, 28));
        }
        fx.link.writes.lock().unwrap().clear();
        fx.link.resizes.lock().unwrap().clear();

        fx.controller.sync_client_size(&fx.tabs);
        assert_eq!(fx.link.resizes.lock().unwrap().as_slice(), &[(121, 30)]);
        assert!(
            fx.link.writes.lock().unwrap()[0].starts_with("refresh-client -C 121x30")
        );

        // Unchanged size: nothing more goes out.
        fx.controller.sync_client_size(&fx.tabs);
        assert_eq!(fx.link.resizes.lock().unwrap().len(), 1);
        assert_eq!(fx.link.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_teardown_removes_all_state() {
        let mut fx = fixture();
        fx.controller.apply_layout(
            TmuxWindowId(1),
            "120x30,0,0{60x30,0,0,1,60x30,61,0,2}",
            None,
            &mut fx.tabs,
            &mut fx.writers,
        );
        fx.controller.teardown(&mut fx.tabs, &mut fx.writers);
        assert!(fx.tabs.is_empty());
        assert_eq!(fx.controller.phase(), ControllerPhase::Ended);
        assert!(fx.controller.binding_for(TmuxPaneId(1)).is_none());
    }

    #[test]
    fn test_partial_lines_are_buffered() {
        let mut fx = fixture();
        feed(&mut fx, b"%session-chan");
        assert_eq!(fx.controller.phase(), ControllerPhase::Initiating);
        feed(&mut fx, b"ged $0 dev\r\n");
        assert_eq!(fx.controller.phase(), ControllerPhase::Connected);
        assert_eq!(fx.controller.session_name(), Some("dev"));
    }

    #[test]
    fn test_malformed_layout_installs_fallback() {
        let mut fx = fixture();
        feed(&mut fx, b"%layout-change @4 not-a-layout\n");
        let tab_id = fx.controller.tab_for_window(TmuxWindowId(4)).unwrap();
        let tab = fx.tabs.get(tab_id).unwrap();
        assert_eq!(tab.layout.pane_count(), 1);
        // The fallback binds tmux pane %0.
        assert!(fx.controller.binding_for(TmuxPaneId(0)).is_some());
    }
}
