//! End-to-end: simulated fleet feeding the billing runtime in-process

use chrono::{DateTime, TimeZone, Utc};
use parking_stream::domain::{BillingAction, BillingEvent, EventKind, VehicleStatus, BLOCK_PRICE};
use parking_stream::infra::{Config, Metrics};
use parking_stream::io::ChannelSink;
use parking_stream::services::{FleetConfig, FleetSimulator, SessionRuntime};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::{mpsc, watch};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
}

/// Config writing checkpoints and billing output under `dir`
fn config_in(dir: &TempDir) -> Config {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[mqtt]
host = "localhost"
port = 1883

[broker]
enabled = false

[processor]
checkpoint_dir = "{}"

[egress]
file = "{}"
mqtt_enabled = false
"#,
        dir.path().join("checkpoint").display(),
        dir.path().join("billing.jsonl").display()
    )
    .unwrap();
    file.flush().unwrap();
    Config::from_file(file.path()).unwrap()
}

fn assert_priced(event: &BillingEvent) {
    assert_eq!(
        event.total_cost,
        i64::from(event.parked_blocks) * BLOCK_PRICE,
        "{} {:?}",
        event.license_plate,
        event.action
    );
    if matches!(
        event.action,
        BillingAction::VehicleParked | BillingAction::ParkingUpdated | BillingAction::PeriodicUpdate
    ) {
        assert!(event.parked_blocks >= 1);
    }
    if event.event_type == EventKind::TimerEvent {
        assert_eq!(event.action, BillingAction::PeriodicUpdate);
        assert_eq!(event.status, VehicleStatus::Parked);
    }
}

#[test]
fn test_simulated_fleet_bills_consistently() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let metrics = Arc::new(Metrics::new());
    let mut runtime = SessionRuntime::new(&config, metrics.clone(), None, t0());
    let mut fleet = FleetSimulator::with_seed(FleetConfig::default(), Some(2025));

    let mut now = t0();
    let mut emitted = Vec::new();
    for _ in 0..2_000 {
        now += chrono::Duration::seconds(3);
        let raw = fleet.step(now);
        emitted.extend(runtime.process_batch(vec![raw], now));
        emitted.extend(runtime.fire_due_timers(now));
    }

    assert!(!emitted.is_empty());
    for event in &emitted {
        assert_priced(event);
    }

    let exits: Vec<_> =
        emitted.iter().filter(|e| e.action == BillingAction::VehicleExiting).collect();
    assert!(!exits.is_empty());
    assert!(emitted.iter().any(|e| e.event_type == EventKind::TimerEvent));

    let snapshot = runtime.snapshot();
    assert_eq!(snapshot.completed_sessions(), exits.len() as u64);
    assert_eq!(snapshot.collected_revenue(), exits.iter().map(|e| e.total_cost).sum::<i64>());
    assert_eq!(metrics.revenue_collected(), snapshot.collected_revenue());
    assert_eq!(snapshot.messages_processed(), emitted.len() as u64);
    assert!(snapshot.occupied() <= snapshot.capacity());

    let lines = std::fs::read_to_string(dir.path().join("billing.jsonl")).unwrap();
    assert_eq!(lines.lines().count(), emitted.len());
}

#[test]
fn test_checkpoint_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let mut fleet = FleetSimulator::with_seed(FleetConfig::default(), Some(7));

    let mut now = t0();
    let sessions = {
        let mut runtime = SessionRuntime::new(&config, Arc::new(Metrics::new()), None, t0());
        for _ in 0..300 {
            now += chrono::Duration::seconds(3);
            let raw = fleet.step(now);
            runtime.process_batch(vec![raw], now);
            runtime.fire_due_timers(now);
        }
        assert!(runtime.write_checkpoint(now));
        runtime.active_sessions()
    };

    let restored = SessionRuntime::new(&config, Arc::new(Metrics::new()), None, now);
    assert_eq!(restored.active_sessions(), sessions);
}

#[tokio::test(start_paused = true)]
async fn test_channel_sink_into_runtime() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let (tx, mut rx) = mpsc::channel(1024);
    let mut sink = ChannelSink::new(tx);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut fleet = FleetSimulator::with_seed(FleetConfig::default(), Some(3));
    let stats = fleet.run(&mut sink, Duration::from_secs(120), shutdown_rx).await;
    assert!(stats.delivered > 0);

    let mut raw = Vec::new();
    while let Ok(event) = rx.try_recv() {
        raw.push(event);
    }
    assert_eq!(raw.len() as u64, stats.delivered);

    let metrics = Arc::new(Metrics::new());
    let mut runtime = SessionRuntime::new(&config, metrics.clone(), None, Utc::now());
    let out = runtime.process_batch(raw, Utc::now());

    // One callback per plate, each emitting at most one billing event
    assert!(!out.is_empty());
    assert!(out.len() <= 45);
    for event in &out {
        assert_priced(event);
    }
}
