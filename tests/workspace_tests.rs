//! Workspace tests that exercise real child processes.
//!
//! These spawn actual shells, so they are unix-only; the PTY backend falls
//! back to pipes automatically where no pty device is available.

#![cfg(unix)]

use ptmux_core::layout::{LayoutNode, SplitDirection};
use ptmux_core::pty::SpawnOptions;
use ptmux_core::{Config, Workspace};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn sink_writer() -> (
    Box<dyn FnMut(&[u8]) + Send>,
    Arc<Mutex<Vec<u8>>>,
) {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let writer_sink = Arc::clone(&sink);
    let writer = Box::new(move |bytes: &[u8]| {
        writer_sink.lock().unwrap().extend_from_slice(bytes);
    });
    (writer, sink)
}

/// Pump the workspace until `predicate` holds or the timeout elapses.
async fn pump_until(
    workspace: &mut Workspace,
    timeout: Duration,
    mut predicate: impl FnMut() -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !predicate() {
        tokio::select! {
            _ = workspace.next_step() => {}
            _ = tokio::time::sleep_until(deadline) => return false,
        }
    }
    true
}

#[tokio::test]
async fn shell_output_and_exit_notice_reach_the_pane_writer() {
    let mut workspace = Workspace::new(Config::default());
    let tab = workspace
        .new_local_tab(SpawnOptions {
            command: Some("/bin/sh".to_string()),
            args: vec!["-c".to_string(), "printf ready".to_string()],
            ..Default::default()
        })
        .await
        .expect("spawn shell");

    let pane = workspace.tabs().get(tab).unwrap().active_pane;
    let (writer, sink) = sink_writer();
    workspace.register_pane_writer(pane, writer);

    let done = pump_until(&mut workspace, Duration::from_secs(10), || {
        let data = sink.lock().unwrap();
        String::from_utf8_lossy(&data).contains("[Process exited with code 0]")
    })
    .await;
    assert!(done, "timed out waiting for exit notice");

    let data = sink.lock().unwrap();
    let text = String::from_utf8_lossy(&data);
    assert!(text.contains("ready"), "missing output in: {text:?}");

    drop(data);
    workspace.shutdown();
}

#[tokio::test]
async fn splitting_a_local_pane_grows_the_layout() {
    let mut workspace = Workspace::new(Config::default());
    let tab = workspace
        .new_local_tab(SpawnOptions::default())
        .await
        .expect("spawn shell");
    let first_pane = workspace.tabs().get(tab).unwrap().active_pane;

    workspace
        .split_active_pane(SplitDirection::Horizontal)
        .await
        .expect("split");

    let state = workspace.tabs().get(tab).unwrap();
    let panes = state.layout.collect_panes();
    assert_eq!(panes.len(), 2);
    assert_eq!(panes[0], first_pane);
    assert_eq!(state.active_pane, panes[1]);
    match &state.layout {
        LayoutNode::Split {
            direction, ratio, ..
        } => {
            assert_eq!(*direction, SplitDirection::Horizontal);
            assert!((ratio - 0.5).abs() < 1e-6);
        }
        _ => panic!("expected split"),
    }

    // Closing the new pane collapses back to a single leaf.
    workspace.close_active_pane().expect("close pane");
    let state = workspace.tabs().get(tab).unwrap();
    assert_eq!(state.layout, LayoutNode::Pane(first_pane));
    assert_eq!(state.active_pane, first_pane);

    workspace.shutdown();
}

#[tokio::test]
async fn keystrokes_round_trip_through_the_pty() {
    let mut workspace = Workspace::new(Config::default());
    let tab = workspace
        .new_local_tab(SpawnOptions {
            command: Some("/bin/cat".to_string()),
            ..Default::default()
        })
        .await
        .expect("spawn cat");

    let pane = workspace.tabs().get(tab).unwrap().active_pane;
    let (writer, sink) = sink_writer();
    workspace.register_pane_writer(pane, writer);

    assert!(workspace.write_to_pane(pane, b"hello\n"));

    let done = pump_until(&mut workspace, Duration::from_secs(10), || {
        let data = sink.lock().unwrap();
        String::from_utf8_lossy(&data).contains("hello")
    })
    .await;
    assert!(done, "timed out waiting for echoed input");

    workspace.shutdown();
}
