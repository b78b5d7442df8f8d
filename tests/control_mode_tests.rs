//! End-to-end control-mode scenarios driven through the public API.
//!
//! A recording control link stands in for the `tmux -CC` PTY; bytes are
//! fed exactly as tmux would emit them.

use ptmux_core::ids::{ControlSessionId, PtySessionId};
use ptmux_core::layout::LayoutNode;
use ptmux_core::tmux::{ControlLink, ControllerPhase, TmuxController, TmuxPaneId, TmuxWindowId};
use ptmux_core::workspace::tab::{PaneWriters, TabSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

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

struct Harness {
    controller: TmuxController,
    tabs: TabSet,
    writers: PaneWriters,
    link: RecordingLink,
}

impl Harness {
    fn new() -> Self {
        let link = RecordingLink::default();
        let controller = TmuxController::new(
            ControlSessionId::new(),
            PtySessionId::new(),
            Box::new(link.clone()),
            Duration::from_secs(5),
            Duration::from_secs(15),
        );
        Self {
            controller,
            tabs: TabSet::new(),
            writers: PaneWriters::new(),
            link,
        }
    }

    fn feed(&mut self, bytes: &[u8]) {
        self.controller
            .process_bytes(bytes, &mut self.tabs, &mut self.writers);
    }

    fn pane_sink(&mut self, pane: TmuxPaneId) -> Arc<Mutex<Vec<u8>>> {
        let native = self.controller.binding_for(pane).unwrap().pane;
        let sink = Arc::new(Mutex::new(Vec::new()));
        let writer_sink = Arc::clone(&sink);
        self.writers.register(
            native,
            Box::new(move |bytes: &[u8]| {
                writer_sink.lock().unwrap().extend_from_slice(bytes);
            }),
        );
        sink
    }
}

#[test]
fn attach_bootstrap_builds_tabs_from_window_lines() {
    let mut h = Harness::new();
    h.controller.start();

    // tmux answers the three bootstrap commands in order.
    h.feed(b"%session-changed $0 main\n");
    h.feed(b"%begin 100 1 0\n__SOCKET__::/tmp/tmux-1000/default\n%end 100 1 0\n");
    h.feed(b"%begin 100 2 0\n__PANE__::@1::%0\n__PANE__::@1::%1\n%end 100 2 0\n");
    h.feed(
        b"%begin 100 3 0\n__WINDOW__::@1::editor::120x30,0,0{60x30,0,0,0,59x30,61,0,1}\n%end 100 3 0\n",
    );

    assert_eq!(h.controller.phase(), ControllerPhase::Connected);
    assert_eq!(h.controller.session_name(), Some("main"));

    let tab_id = h.controller.tab_for_window(TmuxWindowId(1)).unwrap();
    let tab = h.tabs.get(tab_id).unwrap();
    assert_eq!(tab.title, "editor");
    assert_eq!(tab.panes.len(), 2);
    assert_eq!(tab.layout.pane_count(), 2);
    assert!(tab.is_tmux_bound());

    // Exactly one control write per bootstrap command.
    let writes = h.link.writes.lock().unwrap();
    let commands: Vec<&String> = writes
        .iter()
        .filter(|w| {
            w.starts_with("display-message")
                || w.starts_with("list-panes")
                || w.starts_with("list-windows")
        })
        .collect();
    assert_eq!(commands.len(), 3);
}

#[test]
fn output_before_hydration_is_buffered_then_replaced_by_history() {
    let mut h = Harness::new();
    h.feed(b"%layout-change @1 80x24,0,0,5\n");
    let sink = h.pane_sink(TmuxPaneId(5));

    h.feed(b"%output %5 prompt$ \n");
    assert!(sink.lock().unwrap().is_empty());

    h.controller.on_hydration_result(
        TmuxPaneId(5),
        Some(b"old scrollback\r\n".to_vec()),
        &mut h.writers,
    );
    h.feed(b"%output %5 live\n");

    assert_eq!(sink.lock().unwrap().as_slice(), b"old scrollback\r\nlive");
}

#[test]
fn divider_drag_survives_tmux_layout_refresh() {
    let mut h = Harness::new();
    h.feed(b"%layout-change @3 9d2f,120x30,0,0{60x30,0,0,1,60x30,61,0,2}\n");
    let tab_id = h.controller.tab_for_window(TmuxWindowId(3)).unwrap();

    // The user drags the divider to 70/30.
    h.tabs
        .get_mut(tab_id)
        .unwrap()
        .layout
        .update_ratio_at(&[], 0.7);

    // tmux refreshes the same structure with 50/50 geometry.
    h.feed(b"%layout-change @3 9d2f,120x30,0,0{60x30,0,0,1,60x30,61,0,2}\n");

    match &h.tabs.get(tab_id).unwrap().layout {
        LayoutNode::Split { ratio, .. } => assert!((ratio - 0.7).abs() < 1e-6),
        _ => panic!("expected split"),
    }

    // A structural change (split direction flips) takes the new layout.
    h.feed(b"%layout-change @3 9d2f,120x30,0,0[120x15,0,0,1,120x14,0,16,2]\n");
    match &h.tabs.get(tab_id).unwrap().layout {
        LayoutNode::Split { ratio, .. } => assert!((ratio - 15.0 / 29.0).abs() < 1e-3),
        _ => panic!("expected split"),
    }
}

#[test]
fn closing_one_window_leaves_the_other_tab_intact() {
    let mut h = Harness::new();
    h.feed(b"%layout-change @1 80x24,0,0,1\n");
    h.feed(b"%layout-change @2 80x24,0,0,2\n");
    assert_eq!(h.tabs.len(), 2);

    h.feed(b"%window-close @1\n");
    assert_eq!(h.tabs.len(), 1);
    assert!(h.controller.tab_for_window(TmuxWindowId(1)).is_none());

    let survivor = h.controller.tab_for_window(TmuxWindowId(2)).unwrap();
    assert!(h.tabs.get(survivor).is_some());
    assert!(h.controller.binding_for(TmuxPaneId(2)).is_some());
    assert!(h.controller.binding_for(TmuxPaneId(1)).is_none());
}

#[test]
fn pane_reuse_keeps_native_ids_across_splits() {
    let mut h = Harness::new();
    h.feed(b"%layout-change @1 120x30,0,0,1\n");
    let original = h.controller.binding_for(TmuxPaneId(1)).unwrap().pane;

    // A split arrives: %1 is kept, %2 is new.
    h.feed(b"%layout-change @1 120x30,0,0{60x30,0,0,1,59x30,61,0,2}\n");
    assert_eq!(h.controller.binding_for(TmuxPaneId(1)).unwrap().pane, original);
    let added = h.controller.binding_for(TmuxPaneId(2)).unwrap().pane;
    assert_ne!(added, original);

    // The split closes again: %1 still maps to the same native pane.
    h.feed(b"%layout-change @1 120x30,0,0,1\n");
    assert_eq!(h.controller.binding_for(TmuxPaneId(1)).unwrap().pane, original);
    assert!(h.controller.binding_for(TmuxPaneId(2)).is_none());
}
