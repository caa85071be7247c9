//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Raw events accepted at ingress (monotonic)
    raw_events_received: AtomicU64,
    /// Payloads rejected at ingress: malformed JSON or unknown status (monotonic)
    raw_events_rejected: AtomicU64,
    /// Events older than the lateness horizon (monotonic)
    late_events_dropped: AtomicU64,
    /// Raw events handed to the processor since last report (reset on report)
    events_since_report: AtomicU64,
    /// Key batches processed (monotonic)
    batches_total: AtomicU64,
    /// Sum of batch latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max batch latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Batch processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Batches since last report (reset on report)
    batches_since_report: AtomicU64,
    /// Billing events emitted from vehicle events (monotonic)
    billing_vehicle_events: AtomicU64,
    /// Billing events emitted from timers (monotonic)
    billing_timer_events: AtomicU64,
    /// Timer callbacks invoked, including ones that emitted nothing (monotonic)
    timers_fired: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    /// Sum of final costs of closed sessions
    revenue_collected: AtomicI64,
    checkpoints_written: AtomicU64,
    checkpoint_failures: AtomicU64,
    /// Egress messages dropped because the channel was full (monotonic)
    egress_dropped: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
    /// Most recent summary, served to scrapers without resetting counters
    last_summary: parking_lot::Mutex<Option<MetricsSummary>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            raw_events_received: AtomicU64::new(0),
            raw_events_rejected: AtomicU64::new(0),
            late_events_dropped: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            batches_total: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            batches_since_report: AtomicU64::new(0),
            billing_vehicle_events: AtomicU64::new(0),
            billing_timer_events: AtomicU64::new(0),
            timers_fired: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            revenue_collected: AtomicI64::new(0),
            checkpoints_written: AtomicU64::new(0),
            checkpoint_failures: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
            last_summary: parking_lot::Mutex::new(None),
        }
    }

    #[inline]
    pub fn record_raw_event_received(&self) {
        self.raw_events_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_raw_event_rejected(&self) {
        self.raw_events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_late_event_dropped(&self) {
        self.late_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a key batch was processed with given latency (lock-free)
    #[inline]
    pub fn record_batch_processed(&self, events: usize, latency_us: u64) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.batches_since_report.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(events as u64, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_billing_event(&self, from_timer: bool) {
        if from_timer {
            self.billing_timer_events.fetch_add(1, Ordering::Relaxed);
        } else {
            self.billing_vehicle_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_timer_fired(&self) {
        self.timers_fired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_closed(&self, final_cost: i64) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
        self.revenue_collected.fetch_add(final_cost, Ordering::Relaxed);
    }

    pub fn record_checkpoint(&self, ok: bool) {
        if ok {
            self.checkpoints_written.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn raw_events_received(&self) -> u64 {
        self.raw_events_received.load(Ordering::Relaxed)
    }

    pub fn raw_events_rejected(&self) -> u64 {
        self.raw_events_rejected.load(Ordering::Relaxed)
    }

    pub fn late_events_dropped(&self) -> u64 {
        self.late_events_dropped.load(Ordering::Relaxed)
    }

    pub fn billing_events_total(&self) -> u64 {
        self.billing_vehicle_events.load(Ordering::Relaxed)
            + self.billing_timer_events.load(Ordering::Relaxed)
    }

    pub fn timers_fired(&self) -> u64 {
        self.timers_fired.load(Ordering::Relaxed)
    }

    pub fn sessions_closed(&self) -> u64 {
        self.sessions_closed.load(Ordering::Relaxed)
    }

    pub fn revenue_collected(&self) -> i64 {
        self.revenue_collected.load(Ordering::Relaxed)
    }

    /// Generate a metrics summary and reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, active_sessions: usize, pending_timers: usize) -> MetricsSummary {
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let batch_count = self.batches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if batch_count > 0 { latency_sum / batch_count } else { 0 };

        let summary = MetricsSummary {
            raw_events_received: self.raw_events_received.load(Ordering::Relaxed),
            raw_events_rejected: self.raw_events_rejected.load(Ordering::Relaxed),
            late_events_dropped: self.late_events_dropped.load(Ordering::Relaxed),
            events_per_sec,
            batches_total: self.batches_total.load(Ordering::Relaxed),
            avg_batch_latency_us: avg_latency,
            max_batch_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            billing_vehicle_events: self.billing_vehicle_events.load(Ordering::Relaxed),
            billing_timer_events: self.billing_timer_events.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            revenue_collected: self.revenue_collected.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            egress_dropped: self.egress_dropped.load(Ordering::Relaxed),
            active_sessions,
            pending_timers,
        };
        *self.last_summary.lock() = Some(summary.clone());
        summary
    }

    /// Summary produced by the last `report()`, if any
    pub fn latest_summary(&self) -> Option<MetricsSummary> {
        self.last_summary.lock().clone()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub raw_events_received: u64,
    pub raw_events_rejected: u64,
    pub late_events_dropped: u64,
    pub events_per_sec: f64,
    pub batches_total: u64,
    pub avg_batch_latency_us: u64,
    pub max_batch_latency_us: u64,
    /// Batch latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub billing_vehicle_events: u64,
    pub billing_timer_events: u64,
    pub timers_fired: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub revenue_collected: i64,
    pub checkpoints_written: u64,
    pub checkpoint_failures: u64,
    pub egress_dropped: u64,
    /// Sessions held in keyed state at report time
    pub active_sessions: usize,
    /// Registered timers at report time
    pub pending_timers: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            received = %self.raw_events_received,
            rejected = %self.raw_events_rejected,
            late = %self.late_events_dropped,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_batch_latency_us,
            p99_us = %self.lat_p99_us,
            billing = %(self.billing_vehicle_events + self.billing_timer_events),
            timers_fired = %self.timers_fired,
            active_sessions = %self.active_sessions,
            pending_timers = %self.pending_timers,
            revenue = %self.revenue_collected,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.raw_events_received(), 0);
        assert_eq!(metrics.billing_events_total(), 0);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_batch_processed(2, 100);
        metrics.record_batch_processed(1, 200);
        metrics.record_batch_processed(1, 300);
        metrics.record_billing_event(false);
        metrics.record_billing_event(true);

        let summary = metrics.report(5, 2);

        assert_eq!(summary.batches_total, 3);
        assert_eq!(summary.avg_batch_latency_us, 200);
        assert_eq!(summary.max_batch_latency_us, 300);
        assert_eq!(summary.billing_vehicle_events, 1);
        assert_eq!(summary.billing_timer_events, 1);
        assert_eq!(summary.active_sessions, 5);
        assert_eq!(summary.pending_timers, 2);

        // Periodic counters should be reset
        assert_eq!(metrics.events_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report(0, 0);

        assert_eq!(summary.batches_total, 0);
        assert_eq!(summary.avg_batch_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_latest_summary_kept_after_report() {
        let metrics = Metrics::new();
        assert!(metrics.latest_summary().is_none());

        metrics.record_batch_processed(4, 120);
        metrics.report(7, 3);

        let latest = metrics.latest_summary().unwrap();
        assert_eq!(latest.batches_total, 1);
        assert_eq!(latest.active_sessions, 7);
        // Reading it again does not reset anything
        assert_eq!(metrics.latest_summary().unwrap().max_batch_latency_us, 120);
    }

    #[test]
    fn test_session_revenue() {
        let metrics = Metrics::new();
        metrics.record_session_opened();
        metrics.record_session_closed(30_000);
        metrics.record_session_closed(10_000);

        assert_eq!(metrics.sessions_closed(), 2);
        assert_eq!(metrics.revenue_collected(), 40_000);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    m.record_raw_event_received();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.raw_events_received(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_batch_processed(1, 150);
        }

        let summary = metrics.report(0, 0);

        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
