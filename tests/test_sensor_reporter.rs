//! Sensor reporter gating and send behaviour
//!
//! The reporter runs against a mock transport and a hand-driven snapshot
//! channel, with paused time so report intervals elapse instantly.


use meshnode::connectivity::{ConnectivitySnapshot, ConnectivityState};
use meshnode::mesh::{MeshTransport, NodeType, TransportError};
use meshnode::sensor::{
    CycleOutcome, ReportPayload, ReporterConfig, SensorFault, SensorReporter, ERROR_MARKER,
};
use meshnode::testing::{MockMeshTransport, RecordingDisplay, ScriptedInstruments};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{routed_snapshot, LEAF, RELAY_A, ROOT};
use tokio::sync::watch;

fn config(node_id: &str) -> ReporterConfig {
    ReporterConfig {
        node_id: node_id.to_string(),
        role: NodeType::Leaf,
        interval: Duration::from_secs(5),
        gate_poll: Duration::from_millis(300),
    }
}

struct Harness {
    transport: Arc<MockMeshTransport>,
    snapshot_tx: watch::Sender<ConnectivitySnapshot>,
    display: RecordingDisplay,
    reporter: SensorReporter<MockMeshTransport>,
}

fn harness(node_id: &str, instruments: ScriptedInstruments) -> Harness {
    let transport = Arc::new(MockMeshTransport::new(LEAF));
    transport.set_started(true);
    let (snapshot_tx, snapshot_rx) = watch::channel(ConnectivitySnapshot::default());
    let display = RecordingDisplay::new();
    let reporter = SensorReporter::new(
        config(node_id),
        transport.clone(),
        snapshot_rx,
        Box::new(instruments),
        Box::new(display.clone()),
    );
    Harness {
        transport,
        snapshot_tx,
        display,
        reporter,
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_sends_before_route_exists() {
    let h = harness("Leaf_01", ScriptedInstruments::steady(24, 55, false, 400));
    let transport = h.transport.clone();
    let snapshot_tx = h.snapshot_tx;
    let task = tokio::spawn(h.reporter.run());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(transport.sends().is_empty());

    // Attached but the root has not announced itself yet
    snapshot_tx.send_replace(ConnectivitySnapshot {
        state: ConnectivityState::Connected,
        parent: Some(RELAY_A),
        root: None,
        layer: 3,
        reselection_requested: false,
    });
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(transport.sends().is_empty());

    // Root latched from an earlier attachment, but currently detached
    snapshot_tx.send_replace(ConnectivitySnapshot {
        state: ConnectivityState::Disconnected,
        parent: None,
        root: Some(ROOT),
        layer: 0,
        reselection_requested: true,
    });
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(transport.sends().is_empty());

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_reports_flow_to_root_once_routed() {
    let h = harness("Leaf_01", ScriptedInstruments::steady(24, 55, true, 4095));
    let transport = h.transport.clone();
    let display = h.display.clone();
    let snapshot_tx = h.snapshot_tx;
    let task = tokio::spawn(h.reporter.run());

    snapshot_tx.send_replace(routed_snapshot(RELAY_A, ROOT));
    // First report right after the gate opens, then one per interval
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.sends().len(), 1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    let sends = transport.sends();
    assert_eq!(sends.len(), 3);

    for (dest, payload) in &sends {
        assert_eq!(*dest, ROOT);
        let ReportPayload::Record(record) = ReportPayload::decode(payload).unwrap() else {
            panic!("expected a sensor record");
        };
        assert_eq!(record.node_id, "Leaf_01");
        assert_eq!(record.role, "leaf");
        assert_eq!(record.temp, 24);
        assert_eq!(record.humi, 55);
        assert_eq!(record.light_raw, 4095);
        assert!((record.light_v - 3.3).abs() < 1e-9);
        assert_eq!(record.motion, 1);
    }

    assert_eq!(display.row(0).as_deref(), Some("Node: Leaf_01"));
    assert_eq!(display.row(2).as_deref(), Some("Temp:24C"));
    assert_eq!(display.row(5).as_deref(), Some("Motion:YES"));
    assert_eq!(display.clears(), 3);

    task.abort();
}

#[tokio::test]
async fn test_cycle_without_route_is_dropped() {
    let mut h = harness("Leaf_01", ScriptedInstruments::steady(20, 40, false, 0));

    assert_eq!(h.reporter.run_cycle().await, CycleOutcome::Dropped);
    assert!(h.transport.calls().is_empty());
    // The panel still shows the fresh sample
    assert_eq!(h.display.row(2).as_deref(), Some("Temp:20C"));
}

#[tokio::test]
async fn test_send_failure_is_absorbed() {
    let mut h = harness("Leaf_01", ScriptedInstruments::steady(20, 40, false, 0));
    h.snapshot_tx.send_replace(routed_snapshot(RELAY_A, ROOT));
    h.transport.fail_send(true);

    assert_eq!(
        h.reporter.run_cycle().await,
        CycleOutcome::SendFailed(TransportError::NoRoute(ROOT))
    );

    h.transport.fail_send(false);
    assert!(matches!(
        h.reporter.run_cycle().await,
        CycleOutcome::Sent { root, fallback: false, .. } if root == ROOT
    ));
}

#[tokio::test]
async fn test_sensor_fault_reuses_last_reading() {
    let mut instruments = ScriptedInstruments::new();
    instruments.push_climate(Ok(meshnode::sensor::ClimateReading {
        temp_c: 26,
        humidity: 61,
    }));
    instruments.push_climate(Err(SensorFault::new("dht11", "checksum mismatch")));
    let mut h = harness("Leaf_01", instruments);
    h.snapshot_tx.send_replace(routed_snapshot(RELAY_A, ROOT));

    h.reporter.run_cycle().await;
    h.reporter.run_cycle().await;

    let sends = h.transport.sends();
    assert_eq!(sends.len(), 2);
    let ReportPayload::Record(second) = ReportPayload::decode(&sends[1].1).unwrap() else {
        panic!("expected a sensor record");
    };
    assert_eq!((second.temp, second.humi), (26, 61));
}

#[tokio::test]
async fn test_oversized_record_sends_error_marker() {
    let long_id = "L".repeat(300);
    let mut h = harness(&long_id, ScriptedInstruments::steady(20, 40, false, 0));
    h.snapshot_tx.send_replace(routed_snapshot(RELAY_A, ROOT));

    let outcome = h.reporter.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Sent {
            root: ROOT,
            len: ERROR_MARKER.len(),
            fallback: true
        }
    );
    let sends = h.transport.sends();
    assert_eq!(sends[0].1, ERROR_MARKER);
    assert_eq!(
        ReportPayload::decode(&sends[0].1).unwrap(),
        ReportPayload::ErrorMarker {
            err: "json".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_route_loss_after_gate_drops_without_transport_call() {
    let h = harness("Leaf_01", ScriptedInstruments::steady(21, 45, false, 100));
    let transport = h.transport.clone();
    let snapshot_tx = h.snapshot_tx;
    let task = tokio::spawn(h.reporter.run());

    snapshot_tx.send_replace(routed_snapshot(RELAY_A, ROOT));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(transport.sends().len(), 1);

    snapshot_tx.send_replace(ConnectivitySnapshot {
        state: ConnectivityState::Disconnected,
        parent: None,
        root: Some(ROOT),
        layer: 0,
        reselection_requested: true,
    });
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(transport.sends().len(), 1);
    assert!(transport.is_started());

    snapshot_tx.send_replace(routed_snapshot(RELAY_A, ROOT));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.sends().len(), 2);

    task.abort();
}
