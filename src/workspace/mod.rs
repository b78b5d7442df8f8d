//! Workspace coordinator.
//!
//! Owns the ordered tab set, the PTY manager, and the tmux controllers,
//! and routes everything between them: user actions down to PTYs or tmux
//! commands, child output up to pane writers, exits into cleanup. All
//! mutation happens on one executor: host calls and event handling
//! interleave through [`Workspace::next_step`].

pub mod tab;

use crate::config::Config;
use crate::error::CoreError;
use crate::event::CoreEvent;
use crate::ids::{ControlSessionId, PaneId, PtySessionId, TabId};
use crate::layout::{LayoutNode, SplitDirection};
use crate::pty::shell::{clamp_size, resolve_shell, shell_display_name};
use crate::pty::{PtyBackend, PtyManager, SessionKind, SpawnOptions, SpawnResult};
use crate::tmux::probe::{ProbeCollector, ProbeReport, probe_script, probe_token};
use crate::tmux::{
    ControllerJob, TmuxController, TmuxPaneId, capture, commands,
};
use crate::workspace::tab::{PaneKind, PaneState, PaneWriter, PaneWriters, TabSet, TabState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Host menu/shortcut actions routed through the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MenuAction {
    NewTab,
    TmuxAttach,
    TmuxDetach,
    SplitHorizontal,
    SplitVertical,
    ClosePane,
}

/// How to reach the tmux server when attaching.
#[derive(Debug, Clone, Default)]
pub struct TmuxAttachOptions {
    pub session_name: Option<String>,
    pub cwd: Option<PathBuf>,
    pub ssh_target: Option<String>,
    pub ssh_port: Option<u16>,
}

/// A shell probe in flight on one local session.
struct ProbeTap {
    collector: ProbeCollector,
    reply: oneshot::Sender<ProbeReport>,
}

/// The core's top-level owner: tabs, PTYs, controllers.
pub struct Workspace {
    config: Config,
    events_tx: UnboundedSender<CoreEvent>,
    events_rx: UnboundedReceiver<CoreEvent>,
    pty: PtyManager,
    tabs: TabSet,
    writers: PaneWriters,
    controllers: HashMap<ControlSessionId, TmuxController>,
    control_by_pty: HashMap<PtySessionId, ControlSessionId>,
    /// Reverse lookup for local panes.
    pane_by_pty: HashMap<PtySessionId, (TabId, PaneId)>,
    probes: HashMap<PtySessionId, ProbeTap>,
}

impl Workspace {
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        let pty = PtyManager::new(config.clone(), events_tx.clone());
        Self {
            config,
            events_tx,
            events_rx,
            pty,
            tabs: TabSet::new(),
            writers: PaneWriters::new(),
            controllers: HashMap::new(),
            control_by_pty: HashMap::new(),
            pane_by_pty: HashMap::new(),
            probes: HashMap::new(),
        }
    }

    // =========================================================================
    // State queries
    // =========================================================================

    pub fn tabs(&self) -> &TabSet {
        &self.tabs
    }

    pub fn active_tab_id(&self) -> Option<TabId> {
        self.tabs.active_id()
    }

    pub fn controller(&self, id: ControlSessionId) -> Option<&TmuxController> {
        self.controllers.get(&id)
    }

    // =========================================================================
    // Raw session surface (renderer contract)
    // =========================================================================

    /// Spawn a raw child process with no tab attached.
    pub async fn create_pty(&mut self, opts: SpawnOptions) -> Result<SpawnResult, CoreError> {
        self.pty.create(opts).await
    }

    pub fn write_session(&self, session: PtySessionId, bytes: &[u8]) -> bool {
        self.pty.write(session, bytes)
    }

    pub fn resize_session(&self, session: PtySessionId, cols: u16, rows: u16) -> bool {
        let (cols, rows) = clamp_size(cols, rows);
        self.pty.resize(session, cols, rows)
    }

    pub fn kill_session(&self, session: PtySessionId) -> bool {
        self.pty.kill(session)
    }

    /// List tmux session names, best effort.
    pub async fn list_tmux_sessions(&self) -> Vec<String> {
        capture::list_sessions(&self.config.tmux_binary).await
    }

    /// Capture a tmux pane's content out of band.
    pub async fn capture_tmux_pane(
        &self,
        pane: TmuxPaneId,
        lines: Option<u32>,
        socket: Option<&Path>,
    ) -> anyhow::Result<String> {
        capture::capture_pane(&self.config.tmux_binary, socket, pane, lines).await
    }

    /// Register the renderer's writer for a pane. Cached local history is
    /// replayed into it immediately.
    pub fn register_pane_writer(&mut self, pane: PaneId, writer: PaneWriter) {
        self.writers.register(pane, writer);
    }

    // =========================================================================
    // Tab and pane actions
    // =========================================================================

    /// Open a new tab running a local shell.
    pub async fn new_local_tab(&mut self, mut opts: SpawnOptions) -> Result<TabId, CoreError> {
        opts.kind = Some(SessionKind::Shell);
        if opts.command.is_none() {
            opts.command = Some(resolve_shell(None, self.config.shell.as_deref()));
        }
        let title = shell_display_name(opts.command.as_deref().unwrap_or("shell"));
        let spawned = self.pty.create(opts).await?;

        let pane = PaneId::new();
        let tab_id = TabId::new();
        let mut panes = HashMap::new();
        panes.insert(
            pane,
            PaneState::new(
                pane,
                PaneKind::Local {
                    pty_session: spawned.session,
                    backend: spawned.backend,
                },
            ),
        );
        self.tabs.insert(TabState {
            id: tab_id,
            title,
            layout: LayoutNode::Pane(pane),
            panes,
            active_pane: pane,
            tmux_window: None,
            control_session: None,
        });
        self.pane_by_pty.insert(spawned.session, (tab_id, pane));
        self.writers.enable_cache(pane);

        if spawned.backend == PtyBackend::Pipe {
            log::warn!("tab {}: shell running without a pty (pipe backend)", tab_id);
        }
        Ok(tab_id)
    }

    /// Split the active pane. Local panes spawn a new shell; tmux panes
    /// delegate to tmux and wait for the layout change to come back.
    pub async fn split_active_pane(
        &mut self,
        direction: SplitDirection,
    ) -> Result<(), CoreError> {
        let tab_id = self.tabs.active_id().ok_or(CoreError::NoActiveTab)?;
        let tab = self.tabs.get(tab_id).ok_or(CoreError::NoActiveTab)?;
        let active_pane = tab.active_pane;
        let pane_state = tab
            .panes
            .get(&active_pane)
            .ok_or(CoreError::UnknownPane(active_pane))?;

        match pane_state.kind {
            PaneKind::Tmux {
                tmux_pane,
                control_session,
            } => {
                if let Some(controller) = self.controllers.get(&control_session) {
                    controller.split_pane(tmux_pane, direction);
                }
                Ok(())
            }
            PaneKind::Local { .. } => {
                let opts = SpawnOptions {
                    kind: Some(SessionKind::Shell),
                    command: Some(resolve_shell(None, self.config.shell.as_deref())),
                    ..Default::default()
                };
                let spawned = self.pty.create(opts).await?;

                let new_pane = PaneId::new();
                let tab = self.tabs.get_mut(tab_id).ok_or(CoreError::NoActiveTab)?;
                tab.layout = tab.layout.clone().split_at(active_pane, direction, new_pane);
                tab.panes.insert(
                    new_pane,
                    PaneState::new(
                        new_pane,
                        PaneKind::Local {
                            pty_session: spawned.session,
                            backend: spawned.backend,
                        },
                    ),
                );
                tab.active_pane = new_pane;
                self.pane_by_pty.insert(spawned.session, (tab_id, new_pane));
                self.writers.enable_cache(new_pane);
                Ok(())
            }
        }
    }

    /// Close the active pane: tmux panes via `kill-pane`, local panes by
    /// killing the child (the last local pane closes the tab).
    pub fn close_active_pane(&mut self) -> Result<(), CoreError> {
        let tab_id = self.tabs.active_id().ok_or(CoreError::NoActiveTab)?;
        let tab = self.tabs.get(tab_id).ok_or(CoreError::NoActiveTab)?;
        let active_pane = tab.active_pane;
        let pane_state = tab
            .panes
            .get(&active_pane)
            .ok_or(CoreError::UnknownPane(active_pane))?;

        match pane_state.kind {
            PaneKind::Tmux {
                tmux_pane,
                control_session,
            } => {
                if let Some(controller) = self.controllers.get(&control_session) {
                    controller.kill_pane(tmux_pane);
                }
                Ok(())
            }
            PaneKind::Local { pty_session, .. } => {
                if tab.panes.len() <= 1 {
                    return self.close_tab(tab_id);
                }
                let tab = self.tabs.get_mut(tab_id).ok_or(CoreError::NoActiveTab)?;
                if let Some(layout) = tab.layout.clone().remove_pane(active_pane) {
                    tab.layout = layout;
                }
                tab.panes.remove(&active_pane);
                tab.active_pane = tab
                    .layout
                    .collect_panes()
                    .first()
                    .copied()
                    .unwrap_or(active_pane);
                self.writers.remove(active_pane);
                self.pane_by_pty.remove(&pty_session);
                self.pty.kill(pty_session);
                Ok(())
            }
        }
    }

    /// Close a tab. tmux-bound tabs are closed through tmux (the last tab
    /// of a control session detaches instead of killing the window); local
    /// tabs die immediately.
    pub fn close_tab(&mut self, tab_id: TabId) -> Result<(), CoreError> {
        let Some(tab) = self.tabs.get(tab_id) else {
            return Ok(());
        };

        if let (Some(window), Some(control)) = (tab.tmux_window, tab.control_session) {
            if let Some(controller) = self.controllers.get(&control) {
                if self.tabs.tabs_of_control(control).len() <= 1 {
                    controller.detach();
                } else {
                    controller.kill_window(window);
                }
            }
            // Removal happens when tmux confirms (window-close or exit).
            return Ok(());
        }

        let Some(tab) = self.tabs.remove(tab_id) else {
            return Ok(());
        };
        for (pane_id, pane) in &tab.panes {
            if let PaneKind::Local { pty_session, .. } = pane.kind {
                self.pty.kill(pty_session);
                self.pane_by_pty.remove(&pty_session);
            }
            self.writers.remove(*pane_id);
        }
        Ok(())
    }

    /// Switch the active tab; tmux-bound tabs follow in the tmux server.
    pub fn set_active_tab(&mut self, tab_id: TabId) -> bool {
        if !self.tabs.set_active(tab_id) {
            return false;
        }
        if let Some(tab) = self.tabs.get(tab_id)
            && let (Some(window), Some(control)) = (tab.tmux_window, tab.control_session)
            && let Some(controller) = self.controllers.get_mut(&control)
        {
            controller.select_window(window);
            controller.sync_client_size(&self.tabs);
        }
        true
    }

    /// Focus a pane within its tab; tmux panes follow in the tmux server.
    pub fn focus_pane(&mut self, pane: PaneId) -> bool {
        let Some((tab_id, state)) = self.tabs.find_pane(pane) else {
            return false;
        };
        let kind = state.kind;
        if let Some(tab) = self.tabs.get_mut(tab_id) {
            tab.active_pane = pane;
        }
        if let PaneKind::Tmux {
            tmux_pane,
            control_session,
        } = kind
            && let Some(controller) = self.controllers.get(&control_session)
        {
            controller.select_pane(tmux_pane);
        }
        true
    }

    /// Route user keystrokes to a pane.
    pub fn write_to_pane(&mut self, pane: PaneId, bytes: &[u8]) -> bool {
        let Some((_, state)) = self.tabs.find_pane(pane) else {
            return false;
        };
        match state.kind {
            PaneKind::Local { pty_session, .. } => self.pty.write(pty_session, bytes),
            PaneKind::Tmux {
                tmux_pane,
                control_session,
            } => match self.controllers.get(&control_session) {
                Some(controller) => {
                    controller.send_keys(tmux_pane, bytes);
                    true
                }
                None => false,
            },
        }
    }

    /// The renderer reports a pane's new grid size. Local panes resize
    /// their PTY; tmux panes notify tmux and re-sync the client size.
    pub fn resize_pane(&mut self, pane: PaneId, cols: u16, rows: u16) -> bool {
        let (cols, rows) = clamp_size(cols, rows);
        let Some((_, state)) = self.tabs.find_pane_mut(pane) else {
            return false;
        };
        if state.view_size == Some((cols, rows)) {
            return true;
        }
        state.view_size = Some((cols, rows));
        let kind = state.kind;

        match kind {
            PaneKind::Local { pty_session, .. } => self.pty.resize(pty_session, cols, rows),
            PaneKind::Tmux {
                tmux_pane,
                control_session,
            } => match self.controllers.get_mut(&control_session) {
                Some(controller) => {
                    controller.resize_pane(tmux_pane, cols, rows);
                    controller.sync_client_size(&self.tabs);
                    true
                }
                None => false,
            },
        }
    }

    // =========================================================================
    // tmux attach / detach
    // =========================================================================

    /// Spawn a control-mode client and register its controller.
    pub async fn attach_tmux(
        &mut self,
        opts: TmuxAttachOptions,
    ) -> Result<ControlSessionId, CoreError> {
        let argv = match &opts.ssh_target {
            Some(target) => commands::ssh_control_mode_argv(
                target,
                opts.ssh_port,
                opts.session_name.as_deref(),
            ),
            None => commands::control_mode_argv(
                &self.config.tmux_binary,
                opts.session_name.as_deref(),
            ),
        };
        let spawn = SpawnOptions {
            kind: Some(SessionKind::TmuxControl),
            command: Some(argv[0].clone()),
            args: argv[1..].to_vec(),
            cwd: opts.cwd,
            ..Default::default()
        };
        let spawned = self.pty.create(spawn).await?;

        let control = ControlSessionId::new();
        let handle = self
            .pty
            .handle(spawned.session)
            .ok_or(CoreError::UnknownSession(spawned.session))?;
        let mut controller = TmuxController::new(
            control,
            spawned.session,
            Box::new(handle),
            self.config.transaction_timeout(),
            self.config.bootstrap_flush_deadline(),
        );
        controller.start();
        self.controllers.insert(control, controller);
        self.control_by_pty.insert(spawned.session, control);
        log::info!(
            "attached tmux control session {} (pty {})",
            control,
            spawned.session
        );
        Ok(control)
    }

    /// Detach the active tab's control session (or the only one).
    pub fn detach_tmux(&mut self) -> bool {
        let control = self
            .tabs
            .active_tab()
            .and_then(|tab| tab.control_session)
            .or_else(|| self.controllers.keys().next().copied());
        match control.and_then(|id| self.controllers.get(&id)) {
            Some(controller) => {
                controller.detach();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Shell probe
    // =========================================================================

    /// Probe the shell behind a local pane for reachable tmux sessions.
    ///
    /// Resolves with [`ProbeReport::local_fallback`] on timeout.
    pub fn start_shell_probe(
        &mut self,
        pane: PaneId,
    ) -> Result<oneshot::Receiver<ProbeReport>, CoreError> {
        let Some((_, state)) = self.tabs.find_pane(pane) else {
            return Err(CoreError::UnknownPane(pane));
        };
        let PaneKind::Local { pty_session, .. } = state.kind else {
            return Err(CoreError::UnknownPane(pane));
        };

        let token = probe_token();
        let script = probe_script(&token);
        if !self.pty.write(pty_session, script.as_bytes()) {
            return Err(CoreError::UnknownSession(pty_session));
        }

        let (tx, rx) = oneshot::channel();
        self.probes.insert(
            pty_session,
            ProbeTap {
                collector: ProbeCollector::new(&token),
                reply: tx,
            },
        );

        let events = self.events_tx.clone();
        let timeout = self.config.probe_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(CoreEvent::ProbeTimeout {
                session: pty_session,
            });
        });

        Ok(rx)
    }

    // =========================================================================
    // Menu surface
    // =========================================================================

    /// Route a host menu action.
    pub async fn handle_menu_action(&mut self, action: MenuAction) -> Result<(), CoreError> {
        match action {
            MenuAction::NewTab => self.new_local_tab(SpawnOptions::default()).await.map(|_| ()),
            MenuAction::TmuxAttach => self
                .attach_tmux(TmuxAttachOptions::default())
                .await
                .map(|_| ()),
            MenuAction::TmuxDetach => {
                self.detach_tmux();
                Ok(())
            }
            MenuAction::SplitHorizontal => self.split_active_pane(SplitDirection::Horizontal).await,
            MenuAction::SplitVertical => self.split_active_pane(SplitDirection::Vertical).await,
            MenuAction::ClosePane => self.close_active_pane(),
        }
    }

    // =========================================================================
    // Event pump
    // =========================================================================

    /// Wait for and process the next event or deadline. Returns `false`
    /// once the event channel is closed.
    pub async fn next_step(&mut self) -> bool {
        let deadline = self.next_deadline();
        let progressed = tokio::select! {
            event = self.events_rx.recv() => match event {
                Some(event) => {
                    self.handle_event(event).await;
                    true
                }
                None => false,
            },
            _ = sleep_until_or_forever(deadline) => {
                self.on_deadline(Instant::now());
                true
            }
        };
        self.spawn_jobs();
        progressed
    }

    /// Run the pump until the workspace is dropped by the host.
    pub async fn run(&mut self) {
        while self.next_step().await {}
    }

    /// Kill every child process and the helper.
    pub fn shutdown(&mut self) {
        self.pty.shutdown();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.controllers
            .values()
            .filter_map(|controller| controller.next_deadline())
            .min()
    }

    fn on_deadline(&mut self, now: Instant) {
        for controller in self.controllers.values_mut() {
            controller.on_deadline(now, &mut self.writers);
        }
    }

    /// Apply one event to workspace state.
    pub async fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::PtyData {
                session,
                kind: SessionKind::TmuxControl,
                bytes,
                ..
            } => {
                if let Some(control) = self.control_by_pty.get(&session).copied()
                    && let Some(controller) = self.controllers.get_mut(&control)
                {
                    controller.process_bytes(&bytes, &mut self.tabs, &mut self.writers);
                    self.ensure_not_empty().await;
                }
            }
            CoreEvent::PtyData {
                session,
                kind: SessionKind::Shell,
                bytes,
                ..
            } => {
                if let Some(tap) = self.probes.get_mut(&session)
                    && let Some(report) = tap.collector.feed(&bytes)
                {
                    if let Some(tap) = self.probes.remove(&session) {
                        let _ = tap.reply.send(report);
                    }
                }
                if let Some((_, pane)) = self.pane_by_pty.get(&session).copied() {
                    self.writers.write(pane, &bytes);
                } else {
                    log::trace!("pty {}: {} bytes with no pane mapping", session, bytes.len());
                }
            }
            CoreEvent::PtyExit {
                session,
                kind: SessionKind::Shell,
                code,
            } => {
                self.pty.note_exit(session);
                if let Some(tap) = self.probes.remove(&session) {
                    let _ = tap.reply.send(ProbeReport::local_fallback());
                }
                // The pane stays visible until the user closes it.
                if let Some((_, pane)) = self.pane_by_pty.remove(&session) {
                    let notice = format!("\r\n[Process exited with code {code}]\r\n");
                    self.writers.write(pane, notice.as_bytes());
                }
            }
            CoreEvent::PtyExit {
                session,
                kind: SessionKind::TmuxControl,
                code,
            } => {
                self.pty.note_exit(session);
                log::info!("tmux control pty {} exited with code {}", session, code);
                if let Some(control) = self.control_by_pty.remove(&session)
                    && let Some(mut controller) = self.controllers.remove(&control)
                {
                    controller.teardown(&mut self.tabs, &mut self.writers);
                }
                self.ensure_not_empty().await;
            }
            CoreEvent::HydrationTick { control, pane } => {
                if let Some(controller) = self.controllers.get_mut(&control) {
                    controller.on_hydration_tick(pane, &mut self.writers);
                }
            }
            CoreEvent::HydrationDone {
                control,
                pane,
                history,
            } => {
                if let Some(controller) = self.controllers.get_mut(&control) {
                    controller.on_hydration_result(pane, history, &mut self.writers);
                }
            }
            CoreEvent::PrefetchDone {
                control,
                pane,
                history,
            } => {
                if let Some(controller) = self.controllers.get_mut(&control) {
                    controller.on_prefetch_result(pane, history, &mut self.writers);
                }
            }
            CoreEvent::ProbeTimeout { session } => {
                if let Some(tap) = self.probes.remove(&session) {
                    let _ = tap.reply.send(ProbeReport::local_fallback());
                }
            }
        }
        self.spawn_jobs();
    }

    /// A workspace never sits empty: losing the last tab respawns a local
    /// shell.
    async fn ensure_not_empty(&mut self) {
        if !self.tabs.is_empty() {
            return;
        }
        if let Err(err) = self.new_local_tab(SpawnOptions::default()).await {
            log::error!("failed to open replacement shell tab: {}", err);
        }
    }

    /// Execute controller jobs as background tasks that complete back into
    /// the event channel.
    fn spawn_jobs(&mut self) {
        let controls: Vec<ControlSessionId> = self.controllers.keys().copied().collect();
        for control in controls {
            let jobs = match self.controllers.get_mut(&control) {
                Some(controller) => controller.take_jobs(),
                None => continue,
            };
            for job in jobs {
                let events = self.events_tx.clone();
                let binary = self.config.tmux_binary.clone();
                match job {
                    ControllerJob::WaitSocket { pane } => {
                        tokio::spawn(async move {
                            tokio::time::sleep(crate::tmux::SOCKET_WAIT_INTERVAL).await;
                            let _ = events.send(CoreEvent::HydrationTick { control, pane });
                        });
                    }
                    ControllerJob::Capture {
                        pane,
                        socket,
                        delay,
                    } => {
                        tokio::spawn(async move {
                            if delay > Duration::ZERO {
                                tokio::time::sleep(delay).await;
                            }
                            let history = capture::capture_history(&binary, &socket, pane).await;
                            let _ = events.send(CoreEvent::HydrationDone {
                                control,
                                pane,
                                history,
                            });
                        });
                    }
                    ControllerJob::Prefetch { pane, socket } => {
                        tokio::spawn(async move {
                            if let Some(history) =
                                capture::capture_history(&binary, &socket, pane).await
                            {
                                let _ = events.send(CoreEvent::PrefetchDone {
                                    control,
                                    pane,
                                    history,
                                });
                            }
                        });
                    }
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
