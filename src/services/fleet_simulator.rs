//! Synthetic vehicle event generator
//!
//! Owns a small fleet of `VehicleSession`s and the `ResourcePool`. Each step
//! picks one vehicle, emits its current state, advances it, keeps the pool in
//! sync, and grows or shrinks the fleet at random within configured bounds.

use crate::domain::{RawEvent, VehicleStatus};
use crate::infra::config::{secs_to_duration, SimulatorConfig};
use crate::io::event_sink::EventSink;
use crate::services::resource_pool::ResourcePool;
use crate::services::vehicle_session::VehicleSession;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Fleet sizing and pacing
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub initial_fleet: usize,
    /// Vehicles added when the fleet is found empty
    pub reseed_fleet: usize,
    pub min_fleet: usize,
    pub max_fleet: usize,
    /// Chance per step of adding one vehicle
    pub spawn_probability: f64,
    /// Chance per step of removing every EXITING vehicle
    pub removal_probability: f64,
    /// Log progress every N attempted events (0 disables)
    pub report_every: u64,
    /// Mean delay between events
    pub interval: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self::from(&SimulatorConfig::default())
    }
}

impl From<&SimulatorConfig> for FleetConfig {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            initial_fleet: config.initial_fleet,
            reseed_fleet: config.reseed_fleet.max(1),
            min_fleet: config.min_fleet,
            max_fleet: config.max_fleet.max(1),
            spawn_probability: probability(config.spawn_probability),
            removal_probability: probability(config.removal_probability),
            report_every: config.report_every,
            interval: secs_to_duration(config.interval_secs),
        }
    }
}

/// Clamp to `[0, 1]`; NaN counts as never
fn probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Delivery counters for one simulator run
#[derive(Debug, Clone)]
pub struct SimulatorStats {
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub started_at: Instant,
}

impl SimulatorStats {
    fn new() -> Self {
        Self { attempted: 0, delivered: 0, failed: 0, started_at: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn events_per_minute(&self) -> f64 {
        let minutes = self.elapsed().as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.attempted as f64 / minutes
        } else {
            0.0
        }
    }

    fn log_progress(&self, active_vehicles: usize) {
        info!(
            attempted = %self.attempted,
            delivered = %self.delivered,
            failed = %self.failed,
            active_vehicles = %active_vehicles,
            elapsed_secs = format!("{:.1}", self.elapsed().as_secs_f64()),
            "simulator_progress"
        );
    }

    fn log_final(&self) {
        info!(
            attempted = %self.attempted,
            delivered = %self.delivered,
            failed = %self.failed,
            elapsed_secs = format!("{:.1}", self.elapsed().as_secs_f64()),
            events_per_min = format!("{:.1}", self.events_per_minute()),
            "simulator_finished"
        );
    }
}

pub struct FleetSimulator<R> {
    config: FleetConfig,
    pool: ResourcePool,
    sessions: Vec<VehicleSession>,
    rng: R,
    stats: SimulatorStats,
}

impl FleetSimulator<StdRng> {
    /// Simulator with a seeded RNG, or an entropy-seeded one when `seed` is None
    pub fn with_seed(config: FleetConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config, rng)
    }
}

impl<R: Rng> FleetSimulator<R> {
    /// Create a simulator and seed the initial fleet
    pub fn new(config: FleetConfig, rng: R) -> Self {
        let initial = config.initial_fleet;
        let mut sim = Self {
            config,
            pool: ResourcePool::default(),
            sessions: Vec::with_capacity(initial),
            rng,
            stats: SimulatorStats::new(),
        };
        sim.seed_fleet(initial);
        info!(vehicles = %sim.sessions.len(), "fleet_initialized");
        sim
    }

    pub fn sessions(&self) -> &[VehicleSession] {
        &self.sessions
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn stats(&self) -> &SimulatorStats {
        &self.stats
    }

    fn seed_fleet(&mut self, count: usize) {
        for _ in 0..count {
            if !self.spawn() {
                break;
            }
        }
    }

    /// Add one vehicle if the pool has a free plate and bay
    fn spawn(&mut self) -> bool {
        if !self.pool.has_capacity() {
            return false;
        }
        let vehicle = VehicleSession::new(&self.pool, &mut self.rng);
        self.pool.reserve(&vehicle.plate, &vehicle.location);
        debug!(plate = %vehicle.plate, location = %vehicle.location, "vehicle_spawned");
        self.sessions.push(vehicle);
        true
    }

    /// Advance the simulation by one event.
    ///
    /// The returned event carries the chosen vehicle's state before it advanced.
    pub fn step(&mut self, now: DateTime<Utc>) -> RawEvent {
        if self.sessions.is_empty() {
            warn!("fleet_empty_reseeding");
            self.seed_fleet(self.config.reseed_fleet);
        }
        if self.sessions.is_empty() {
            // Pool exhausted with no vehicles left to free it; force one in
            let vehicle = VehicleSession::new(&self.pool, &mut self.rng);
            self.pool.reserve(&vehicle.plate, &vehicle.location);
            self.sessions.push(vehicle);
        }

        let idx = self.rng.gen_range(0..self.sessions.len());
        let vehicle = &mut self.sessions[idx];
        let old_status = vehicle.status;
        let old_plate = vehicle.plate.clone();

        let event = vehicle.snapshot(now);
        vehicle.advance(&self.pool, &mut self.rng);

        match (old_status, vehicle.status) {
            (VehicleStatus::Exiting, VehicleStatus::Entering) => {
                // Bay was already released on entering EXITING
                self.pool.release_plate(&old_plate);
                self.pool.reserve(&vehicle.plate, &vehicle.location);
            }
            (previous, VehicleStatus::Exiting) if previous != VehicleStatus::Exiting => {
                self.pool.release_location(&vehicle.location);
            }
            _ => {}
        }

        if self.sessions.len() < self.config.max_fleet
            && self.rng.gen_bool(self.config.spawn_probability)
            && self.spawn()
        {
            if let Some(vehicle) = self.sessions.last() {
                info!(plate = %vehicle.plate, location = %vehicle.location, "vehicle_added");
            }
        }

        if self.rng.gen_bool(self.config.removal_probability) {
            self.remove_exited();
        }

        while self.sessions.len() < self.config.min_fleet && self.spawn() {}

        event
    }

    /// Drop every EXITING vehicle and release its plate
    fn remove_exited(&mut self) {
        let pool = &mut self.pool;
        self.sessions.retain(|vehicle| {
            if vehicle.status != VehicleStatus::Exiting {
                return true;
            }
            pool.release_plate(&vehicle.plate);
            info!(plate = %vehicle.plate, "vehicle_removed");
            false
        });
    }

    /// Delay until the next event, uniform in [0.5, 1.5] x interval
    pub fn jittered_delay(&mut self) -> Duration {
        secs_to_duration(self.config.interval.as_secs_f64() * self.rng.gen_range(0.5..=1.5))
    }

    /// Plates are unique across the fleet, bays are unique among vehicles not
    /// yet exiting, and the pool agrees with both
    pub fn invariants_hold(&self) -> bool {
        let mut plates = FxHashSet::default();
        let mut locations = FxHashSet::default();
        for vehicle in &self.sessions {
            if !plates.insert(&vehicle.plate) || !self.pool.is_plate_active(&vehicle.plate) {
                return false;
            }
            if vehicle.status == VehicleStatus::Exiting {
                continue;
            }
            if !locations.insert(&vehicle.location)
                || !self.pool.is_location_occupied(&vehicle.location)
            {
                return false;
            }
        }
        true
    }
}

impl<R: Rng + Send> FleetSimulator<R> {
    /// Publish events until `duration` elapses or shutdown is signalled.
    ///
    /// Failed publishes are counted and the run continues.
    pub async fn run<S: EventSink + ?Sized>(
        &mut self,
        sink: &mut S,
        duration: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> SimulatorStats {
        self.stats = SimulatorStats::new();
        // No deadline when the duration runs past what an Instant can hold
        let deadline = self.stats.started_at.checked_add(duration);
        info!(duration_secs = %duration.as_secs(), vehicles = %self.sessions.len(), "simulator_started");

        while deadline.map_or(true, |deadline| Instant::now() < deadline) {
            let event = self.step(Utc::now());
            self.stats.attempted += 1;

            match sink.publish(&event).await {
                Ok(()) => {
                    self.stats.delivered += 1;
                    debug!(
                        plate = %event.license_plate,
                        status = %event.status_code,
                        location = %event.location,
                        "event_published"
                    );
                }
                Err(e) => {
                    self.stats.failed += 1;
                    error!(plate = %event.license_plate, error = %e, "event_publish_failed");
                }
            }

            if self.config.report_every > 0 && self.stats.attempted % self.config.report_every == 0 {
                self.stats.log_progress(self.sessions.len());
            }

            let delay = self.jittered_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("simulator_shutdown");
                        break;
                    }
                }
            }
        }

        if let Err(e) = sink.flush().await {
            warn!(error = %e, "simulator_flush_failed");
        }
        self.stats.log_final();
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::event_sink::ChannelSink;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
    }

    fn simulator(seed: u64) -> FleetSimulator<StdRng> {
        FleetSimulator::with_seed(FleetConfig::default(), Some(seed))
    }

    #[test]
    fn test_initial_fleet_reserved() {
        let sim = simulator(1);
        assert_eq!(sim.sessions().len(), 5);
        assert_eq!(sim.pool().active_plates(), 5);
        assert_eq!(sim.pool().occupied_locations(), 5);
        assert!(sim.invariants_hold());
    }

    #[test]
    fn test_invariants_hold_over_long_run() {
        for seed in [1, 7, 42, 2025] {
            let mut sim = simulator(seed);
            for i in 0..5_000 {
                sim.step(t0() + chrono::Duration::seconds(i));
                assert!(sim.invariants_hold(), "seed {seed} step {i}");
                assert!(sim.sessions().len() >= 3);
                assert!(sim.sessions().len() <= 8);
            }
        }
    }

    #[test]
    fn test_emitted_event_precedes_advance() {
        let mut sim = simulator(3);
        let before: Vec<_> =
            sim.sessions().iter().map(|v| (v.plate.clone(), v.status)).collect();
        let event = sim.step(t0());

        // Every vehicle starts at ENTERING, so the first event must be ENTERING
        assert_eq!(event.status_code, VehicleStatus::Entering);
        assert!(before.iter().any(|(plate, _)| *plate == event.license_plate));
        assert_eq!(event.timestamp_unix, t0().timestamp());
    }

    #[test]
    fn test_per_plate_status_order() {
        let mut sim = simulator(11);
        let mut last: std::collections::HashMap<String, VehicleStatus> = Default::default();
        for i in 0..2_000 {
            let event = sim.step(t0() + chrono::Duration::seconds(i));
            let plate = event.license_plate.as_str().to_string();
            if let Some(prev) = last.get(&plate) {
                let legal = matches!(
                    (prev, event.status_code),
                    (VehicleStatus::Entering, VehicleStatus::Parked)
                        | (VehicleStatus::Parked, VehicleStatus::Parked)
                        | (VehicleStatus::Parked, VehicleStatus::Moving)
                        | (VehicleStatus::Moving, VehicleStatus::Exiting)
                        | (VehicleStatus::Exiting, VehicleStatus::Entering)
                        // removed before its EXITING sample, plate later reused
                        | (VehicleStatus::Moving, VehicleStatus::Entering)
                );
                assert!(legal, "{plate}: {prev:?} -> {:?}", event.status_code);
            }
            last.insert(plate, event.status_code);
        }
    }

    #[test]
    fn test_jittered_delay_bounds() {
        let mut sim = simulator(5);
        for _ in 0..1_000 {
            let delay = sim.jittered_delay();
            assert!(delay >= Duration::from_millis(1_500));
            assert!(delay <= Duration::from_millis(4_500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_duration() {
        let (tx, mut rx) = mpsc::channel(1024);
        let mut sink = ChannelSink::new(tx);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut sim = simulator(9);

        let stats = sim.run(&mut sink, Duration::from_secs(60), shutdown_rx).await;

        assert!(stats.attempted > 0);
        assert_eq!(stats.attempted, stats.delivered);
        assert_eq!(stats.failed, 0);
        // Mean 3s interval over a minute
        assert!(stats.attempted >= 13 && stats.attempted <= 41, "attempted {}", stats.attempted);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, stats.delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_counts_failures_when_sink_closed() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut sim = simulator(9);

        let stats = sim.run(&mut sink, Duration::from_secs(10), shutdown_rx).await;

        assert!(stats.attempted > 0);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.failed, stats.attempted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_honours_shutdown() {
        let (tx, _rx) = mpsc::channel(1024);
        let mut sink = ChannelSink::new(tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut sim = simulator(9);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = shutdown_tx.send(true);
        });
        let stats = sim.run(&mut sink, Duration::from_secs(3_600), shutdown_rx).await;

        assert!(stats.attempted <= 10);
    }

    #[test]
    fn test_out_of_range_settings_are_clamped() {
        let settings = SimulatorConfig {
            spawn_probability: f64::NAN,
            removal_probability: 7.0,
            interval_secs: f64::INFINITY,
            ..SimulatorConfig::default()
        };
        let config = FleetConfig::from(&settings);
        assert_eq!(config.spawn_probability, 0.0);
        assert_eq!(config.removal_probability, 1.0);
        assert_eq!(config.interval, Duration::MAX);

        let mut sim = FleetSimulator::with_seed(config, Some(4));
        for i in 0..20 {
            sim.step(t0() + chrono::Duration::seconds(i));
        }
        assert_eq!(sim.jittered_delay(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_duration_runs_until_shutdown() {
        let (tx, _rx) = mpsc::channel(1024);
        let mut sink = ChannelSink::new(tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut sim = simulator(9);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = shutdown_tx.send(true);
        });
        let stats = sim.run(&mut sink, Duration::MAX, shutdown_rx).await;

        assert!(stats.attempted > 0);
    }
}
