//! Host runtime for the keyed session processor
//!
//! A single task owns the processor, so event and timer callbacks for a plate
//! never run concurrently. Each loop iteration drains the ingress channel into
//! per-plate batches (arrival order kept), runs the event callback once per
//! plate, and fires due timers on a fixed tick.

use crate::domain::{
    render_snapshot, BillingAction, BillingEvent, EventKind, FacilitySnapshot, Plate, RawEvent,
    VehicleStatus,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::checkpoint::CheckpointStore;
use crate::io::egress::Egress;
use crate::io::egress_channel::EgressSender;
use crate::services::session_processor::{KeyedSessionProcessor, MemoryStateStore};
use crate::services::timer_queue::TimerQueue;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Upper bound on events drained from the channel per loop iteration
const MAX_DRAIN: usize = 256;

type KeyBatch = SmallVec<[RawEvent; 4]>;

/// Drops events that fall behind `max(event time seen) - horizon`
#[derive(Debug)]
pub struct LatenessGuard {
    horizon_secs: i64,
    max_seen: Option<i64>,
}

impl LatenessGuard {
    /// A zero horizon disables the guard
    pub fn new(horizon_secs: u64) -> Self {
        Self { horizon_secs: i64::try_from(horizon_secs).unwrap_or(i64::MAX), max_seen: None }
    }

    /// Oldest event time still admitted, in unix seconds
    pub fn watermark(&self) -> Option<i64> {
        self.max_seen.map(|max| max.saturating_sub(self.horizon_secs))
    }

    /// Admit or reject one event, advancing the watermark on admission.
    ///
    /// Events without a usable time are admitted; the processor falls back to
    /// processing time for them. Event times ahead of `now` advance the
    /// watermark no further than `now`.
    pub fn admit(&mut self, event: &RawEvent, now: DateTime<Utc>) -> bool {
        if self.horizon_secs == 0 {
            return true;
        }
        let Some(at) = event.event_time() else {
            return true;
        };
        let ts = at.timestamp();
        if self.watermark().is_some_and(|watermark| ts < watermark) {
            return false;
        }
        let ts = ts.min(now.timestamp());
        self.max_seen = Some(self.max_seen.map_or(ts, |max| max.max(ts)));
        true
    }
}

pub struct SessionRuntime {
    processor: KeyedSessionProcessor<MemoryStateStore, TimerQueue>,
    lateness: LatenessGuard,
    snapshot: FacilitySnapshot,
    egress: Option<Egress>,
    egress_sender: Option<EgressSender>,
    checkpoint: Option<CheckpointStore>,
    metrics: Arc<Metrics>,
    tick_interval: Duration,
    checkpoint_interval: Duration,
    snapshot_interval: Duration,
    metrics_interval: Duration,
}

impl SessionRuntime {
    /// Build the runtime, restoring the last checkpoint if one exists.
    ///
    /// Timers are not checkpointed; restored PARKED sessions get a fresh
    /// timer one interval after `now`.
    pub fn new(
        config: &Config,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
        now: DateTime<Utc>,
    ) -> Self {
        let checkpoint = (!config.checkpoint_dir().is_empty())
            .then(|| CheckpointStore::new(config.checkpoint_dir()));

        let store = match checkpoint.as_ref().map(CheckpointStore::load) {
            Some(Ok(Some(store))) => store,
            Some(Err(e)) => {
                warn!(error = %e, "checkpoint_restore_failed");
                MemoryStateStore::new()
            }
            Some(Ok(None)) | None => MemoryStateStore::new(),
        };

        let parked: Vec<Plate> = store
            .iter()
            .filter(|(_, state)| state.status == VehicleStatus::Parked)
            .map(|(plate, _)| plate.clone())
            .collect();

        let mut processor = KeyedSessionProcessor::with_timer_interval(
            store,
            TimerQueue::new(now),
            config.timer_interval(),
        );
        let rearmed = processor.rearm_parked(&parked);
        if !processor.store().is_empty() {
            info!(sessions = %processor.store().len(), timers = %rearmed, "sessions_restored");
        }

        let egress = (!config.egress_file().is_empty()).then(|| Egress::new(config.egress_file()));

        Self {
            processor,
            lateness: LatenessGuard::new(config.lateness_secs()),
            snapshot: FacilitySnapshot::new(),
            egress,
            egress_sender,
            checkpoint,
            metrics,
            tick_interval: config.tick_interval(),
            checkpoint_interval: Duration::from_secs(config.checkpoint_interval_secs().max(1)),
            snapshot_interval: Duration::from_secs(config.snapshot_interval_secs().max(1)),
            metrics_interval: Duration::from_secs(config.metrics_interval_secs().max(1)),
        }
    }

    pub fn snapshot(&self) -> &FacilitySnapshot {
        &self.snapshot
    }

    pub fn processor(&self) -> &KeyedSessionProcessor<MemoryStateStore, TimerQueue> {
        &self.processor
    }

    pub fn active_sessions(&self) -> usize {
        self.processor.store().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.processor.timers().len()
    }

    /// Group events by plate in arrival order and run the event callback once
    /// per plate. Events behind the lateness watermark are dropped first.
    pub fn process_batch(&mut self, events: Vec<RawEvent>, now: DateTime<Utc>) -> Vec<BillingEvent> {
        self.processor.timers_mut().advance_to(now);

        let mut index: FxHashMap<Plate, usize> = FxHashMap::default();
        let mut batches: Vec<(Plate, KeyBatch)> = Vec::new();
        for event in events {
            if !self.lateness.admit(&event, now) {
                self.metrics.record_late_event_dropped();
                debug!(
                    plate = %event.license_plate,
                    timestamp = %event.timestamp,
                    watermark = ?self.lateness.watermark(),
                    "late_event_dropped"
                );
                continue;
            }
            let slot = *index.entry(event.license_plate.clone()).or_insert_with(|| {
                batches.push((event.license_plate.clone(), SmallVec::new()));
                batches.len() - 1
            });
            batches[slot].1.push(event);
        }

        let mut emitted = Vec::new();
        for (plate, batch) in batches {
            let started = Instant::now();
            let out = self.processor.handle_events(&plate, &batch, now);
            self.metrics
                .record_batch_processed(batch.len(), started.elapsed().as_micros() as u64);
            for event in out {
                self.emit(&event);
                emitted.push(event);
            }
        }
        emitted
    }

    /// Fire every timer due at `now`, earliest first
    pub fn fire_due_timers(&mut self, now: DateTime<Utc>) -> Vec<BillingEvent> {
        let due = self.processor.timers_mut().pop_due(now);
        let mut emitted = Vec::new();
        for (plate, _) in due {
            self.metrics.record_timer_fired();
            if let Some(event) = self.processor.handle_timer(&plate, now) {
                self.emit(&event);
                emitted.push(event);
            }
        }
        emitted
    }

    fn emit(&mut self, event: &BillingEvent) {
        self.metrics.record_billing_event(event.event_type == EventKind::TimerEvent);
        match event.action {
            BillingAction::VehicleEntered => self.metrics.record_session_opened(),
            BillingAction::VehicleExiting => self.metrics.record_session_closed(event.total_cost),
            _ => {}
        }

        self.snapshot.apply(event);

        if let Some(egress) = &self.egress {
            egress.write_event(event);
        }
        if let Some(sender) = &self.egress_sender {
            sender.send_billing(event);
        }
    }

    /// Persist all sessions; failures are logged and counted
    pub fn write_checkpoint(&self, now: DateTime<Utc>) -> bool {
        let Some(checkpoint) = &self.checkpoint else {
            return false;
        };
        match checkpoint.save(self.processor.store(), now) {
            Ok(()) => {
                self.metrics.record_checkpoint(true);
                true
            }
            Err(e) => {
                self.metrics.record_checkpoint(false);
                warn!(error = %e, "checkpoint_failed");
                false
            }
        }
    }

    pub fn log_snapshot(&self) {
        info!(
            occupied = %self.snapshot.occupied(),
            available = %self.snapshot.available(),
            live_revenue = %self.snapshot.live_revenue(),
            collected_revenue = %self.snapshot.collected_revenue(),
            "facility_snapshot"
        );
        for line in render_snapshot(&self.snapshot).lines() {
            info!("{line}");
        }
    }

    fn report_metrics(&self) {
        let summary = self.metrics.report(self.active_sessions(), self.pending_timers());
        summary.log();
        if let Some(sender) = &self.egress_sender {
            sender.send_metrics(summary);
        }
    }

    /// Consume raw events until the channel closes or shutdown is signalled
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<RawEvent>, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now();
        let mut tick = interval_at(start + self.tick_interval, self.tick_interval);
        let mut checkpoint_tick = interval_at(start + self.checkpoint_interval, self.checkpoint_interval);
        let mut snapshot_tick = interval_at(start + self.snapshot_interval, self.snapshot_interval);
        let mut metrics_tick = interval_at(start + self.metrics_interval, self.metrics_interval);
        for ticker in [&mut tick, &mut checkpoint_tick, &mut snapshot_tick, &mut metrics_tick] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        info!(
            tick_ms = %self.tick_interval.as_millis(),
            sessions = %self.active_sessions(),
            timers = %self.pending_timers(),
            "session_runtime_started"
        );

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(first) = event else {
                        info!("event_channel_closed");
                        break;
                    };
                    let mut batch = vec![first];
                    while batch.len() < MAX_DRAIN {
                        match event_rx.try_recv() {
                            Ok(event) => batch.push(event),
                            Err(_) => break,
                        }
                    }
                    self.process_batch(batch, Utc::now());
                }
                _ = tick.tick() => {
                    self.fire_due_timers(Utc::now());
                }
                _ = checkpoint_tick.tick() => {
                    self.write_checkpoint(Utc::now());
                }
                _ = snapshot_tick.tick() => {
                    self.log_snapshot();
                }
                _ = metrics_tick.tick() => {
                    self.report_metrics();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("session_runtime_shutdown");
                        break;
                    }
                }
            }
        }

        // Anything already queued is processed before the final checkpoint
        let mut remaining = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            remaining.push(event);
        }
        if !remaining.is_empty() {
            self.process_batch(remaining, Utc::now());
        }

        self.write_checkpoint(Utc::now());
        self.log_snapshot();
        self.report_metrics();
    }
}
