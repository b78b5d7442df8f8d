//! Tabs, panes, and the pane writer registry.
//!
//! A tab is a native UI container bound either to a tree of local shells
//! or to a single tmux window. Pane output is delivered through writers
//! the renderer registers per pane; local panes additionally keep a
//! bounded history cache that is replayed when a writer re-registers
//! (tmux panes are excluded; they re-hydrate from tmux instead).

use crate::ids::{ControlSessionId, PaneId, PtySessionId, TabId};
use crate::layout::LayoutNode;
use crate::pty::PtyBackend;
use crate::tmux::{TmuxPaneId, TmuxWindowId};
use std::collections::{HashMap, VecDeque};

/// Soft cap for a local pane's replay cache.
const HISTORY_CACHE_CAP: usize = 2 * 1024 * 1024;

/// How a pane is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneKind {
    /// A local child process owned by the PTY manager.
    Local {
        pty_session: PtySessionId,
        backend: PtyBackend,
    },
    /// A tmux pane multiplexed over a control session.
    Tmux {
        tmux_pane: TmuxPaneId,
        control_session: ControlSessionId,
    },
}

/// One pane of a tab.
#[derive(Debug, Clone)]
pub struct PaneState {
    pub id: PaneId,
    pub kind: PaneKind,
    /// Last size reported by the renderer for this pane, in cells.
    pub view_size: Option<(u16, u16)>,
}

impl PaneState {
    pub fn new(id: PaneId, kind: PaneKind) -> Self {
        Self {
            id,
            kind,
            view_size: None,
        }
    }

    pub fn is_tmux(&self) -> bool {
        matches!(self.kind, PaneKind::Tmux { .. })
    }
}

/// One tab of the workspace.
#[derive(Debug)]
pub struct TabState {
    pub id: TabId,
    pub title: String,
    pub layout: LayoutNode,
    pub panes: HashMap<PaneId, PaneState>,
    pub active_pane: PaneId,
    /// Set iff this tab mirrors a tmux window.
    pub tmux_window: Option<TmuxWindowId>,
    /// Control session that owns the tab, for tmux-bound tabs.
    pub control_session: Option<ControlSessionId>,
}

impl TabState {
    /// Whether the tab is driven by a tmux controller rather than the user.
    pub fn is_tmux_bound(&self) -> bool {
        self.tmux_window.is_some()
    }
}

/// Ordered set of tabs plus the active tab id.
#[derive(Default)]
pub struct TabSet {
    order: Vec<TabId>,
    tabs: HashMap<TabId, TabState>,
    active: Option<TabId>,
}

impl TabSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tab at the end of the order. The first tab inserted
    /// becomes active.
    pub fn insert(&mut self, tab: TabState) {
        let id = tab.id;
        if self.tabs.insert(id, tab).is_none() {
            self.order.push(id);
        }
        if self.active.is_none() {
            self.active = Some(id);
        }
    }

    /// Remove a tab; activates the nearest remaining tab if the active one
    /// went away.
    pub fn remove(&mut self, id: TabId) -> Option<TabState> {
        let tab = self.tabs.remove(&id)?;
        if let Some(pos) = self.order.iter().position(|t| *t == id) {
            self.order.remove(pos);
            if self.active == Some(id) {
                self.active = self
                    .order
                    .get(pos.min(self.order.len().saturating_sub(1)))
                    .copied();
                if self.order.is_empty() {
                    self.active = None;
                }
            }
        }
        Some(tab)
    }

    pub fn get(&self, id: TabId) -> Option<&TabState> {
        self.tabs.get(&id)
    }

    pub fn get_mut(&mut self, id: TabId) -> Option<&mut TabState> {
        self.tabs.get_mut(&id)
    }

    pub fn active_id(&self) -> Option<TabId> {
        self.active
    }

    pub fn active_tab(&self) -> Option<&TabState> {
        self.active.and_then(|id| self.tabs.get(&id))
    }

    pub fn set_active(&mut self, id: TabId) -> bool {
        if self.tabs.contains_key(&id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    /// Tab ids in display order.
    pub fn order(&self) -> &[TabId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &TabState> {
        self.order.iter().filter_map(|id| self.tabs.get(id))
    }

    /// Find the tab containing a pane.
    pub fn find_pane(&self, pane: PaneId) -> Option<(TabId, &PaneState)> {
        self.iter()
            .find_map(|tab| tab.panes.get(&pane).map(|p| (tab.id, p)))
    }

    pub fn find_pane_mut(&mut self, pane: PaneId) -> Option<(TabId, &mut PaneState)> {
        let tab_id = self.iter().find(|tab| tab.panes.contains_key(&pane))?.id;
        let state = self.tabs.get_mut(&tab_id)?.panes.get_mut(&pane)?;
        Some((tab_id, state))
    }

    /// Ids of tabs owned by a control session.
    pub fn tabs_of_control(&self, control: ControlSessionId) -> Vec<TabId> {
        self.iter()
            .filter(|tab| tab.control_session == Some(control))
            .map(|tab| tab.id)
            .collect()
    }
}

/// Callback delivering output bytes to the renderer for one pane.
pub type PaneWriter = Box<dyn FnMut(&[u8]) + Send>;

struct HistoryCache {
    chunks: VecDeque<Vec<u8>>,
    bytes: usize,
}

impl HistoryCache {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk.to_vec());
        // Evict oldest-first down to the cap, but always keep the newest
        // chunk even if it alone exceeds it.
        while self.bytes > HISTORY_CACHE_CAP && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.bytes -= evicted.len();
            }
        }
    }
}

/// Per-pane output routing.
#[derive(Default)]
pub struct PaneWriters {
    writers: HashMap<PaneId, PaneWriter>,
    caches: HashMap<PaneId, HistoryCache>,
}

impl PaneWriters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn on history caching for a pane (local panes only).
    pub fn enable_cache(&mut self, pane: PaneId) {
        self.caches.entry(pane).or_insert(HistoryCache {
            chunks: VecDeque::new(),
            bytes: 0,
        });
    }

    /// Register (or replace) the writer for a pane. Any cached history is
    /// replayed into the new writer immediately.
    pub fn register(&mut self, pane: PaneId, mut writer: PaneWriter) {
        if let Some(cache) = self.caches.get(&pane) {
            for chunk in &cache.chunks {
                writer(chunk);
            }
        }
        self.writers.insert(pane, writer);
    }

    /// Deliver bytes to a pane's writer, caching when enabled.
    pub fn write(&mut self, pane: PaneId, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(cache) = self.caches.get_mut(&pane) {
            cache.push(bytes);
        }
        if let Some(writer) = self.writers.get_mut(&pane) {
            writer(bytes);
        }
    }

    /// Drop everything held for a pane.
    pub fn remove(&mut self, pane: PaneId) {
        self.writers.remove(&pane);
        self.caches.remove(&pane);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_writer() -> (PaneWriter, Arc<Mutex<Vec<u8>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let writer_sink = Arc::clone(&sink);
        let writer: PaneWriter = Box::new(move |bytes| {
            writer_sink.lock().unwrap().extend_from_slice(bytes);
        });
        (writer, sink)
    }

    #[test]
    fn test_writer_delivery() {
        let mut writers = PaneWriters::new();
        let pane = PaneId::new();
        let (writer, sink) = recording_writer();
        writers.register(pane, writer);
        writers.write(pane, b"hello");
        assert_eq!(sink.lock().unwrap().as_slice(), b"hello");
    }

    #[test]
    fn test_cache_replays_on_reregister() {
        let mut writers = PaneWriters::new();
        let pane = PaneId::new();
        writers.enable_cache(pane);
        writers.write(pane, b"early ");
        writers.write(pane, b"output");

        let (writer, sink) = recording_writer();
        writers.register(pane, writer);
        assert_eq!(sink.lock().unwrap().as_slice(), b"early output");
    }

    #[test]
    fn test_cache_eviction_keeps_newest_chunk() {
        let mut writers = PaneWriters::new();
        let pane = PaneId::new();
        writers.enable_cache(pane);
        writers.write(pane, &vec![b'a'; HISTORY_CACHE_CAP]);
        writers.write(pane, &vec![b'b'; HISTORY_CACHE_CAP + 1]);

        let (writer, sink) = recording_writer();
        writers.register(pane, writer);
        let replayed = sink.lock().unwrap();
        // The oversized newest chunk survives alone.
        assert_eq!(replayed.len(), HISTORY_CACHE_CAP + 1);
        assert!(replayed.iter().all(|b| *b == b'b'));
    }

    #[test]
    fn test_tab_set_activation_order() {
        let mut tabs = TabSet::new();
        let pane = PaneId::new();
        let mk = |_: usize| {
            let id = TabId::new();
            TabState {
                id,
                title: "t".to_string(),
                layout: LayoutNode::Pane(pane),
                panes: HashMap::new(),
                active_pane: pane,
                tmux_window: None,
                control_session: None,
            }
        };
        let t1 = mk(0);
        let t2 = mk(1);
        let (id1, id2) = (t1.id, t2.id);
        tabs.insert(t1);
        tabs.insert(t2);
        assert_eq!(tabs.active_id(), Some(id1));

        tabs.remove(id1);
        assert_eq!(tabs.active_id(), Some(id2));
        tabs.remove(id2);
        assert_eq!(tabs.active_id(), None);
        assert!(tabs.is_empty());
    }
}
