//! Keyed billing sessions
//!
//! One `SessionState` per license plate, driven by two callbacks the host
//! serializes per key:
//! - `handle_events` consumes the raw events that arrived for a plate
//! - `handle_timer` re-bills a vehicle that is still parked
//!
//! State and timers sit behind the `StateStore` and `Scheduler` seams so the
//! processor runs the same against in-memory maps and a simulated clock.

mod handlers;

use crate::domain::{BillingEvent, Location, Plate, RawEvent, VehicleStatus};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default delay between periodic billing updates
pub const BILLING_TIMER_INTERVAL: Duration = Duration::from_secs(60);

/// Durable per-plate billing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub location: Location,
    pub status: VehicleStatus,
    pub parked_start: Option<DateTime<Utc>>,
    /// Event time of the last input that touched this state
    pub last_update: DateTime<Utc>,
    pub parked_blocks: u32,
    pub total_cost: i64,
}

/// Keyed state access
pub trait StateStore {
    fn get(&self, key: &Plate) -> Option<SessionState>;
    fn put(&mut self, key: &Plate, state: SessionState);
    fn delete(&mut self, key: &Plate);
}

/// In-memory keyed state, also the unit the checkpoint persists
#[derive(Debug, Default, Clone)]
pub struct MemoryStateStore {
    states: FxHashMap<Plate, SessionState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Plate, SessionState)>) -> Self {
        Self { states: entries.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Plate, &SessionState)> {
        self.states.iter()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &Plate) -> Option<SessionState> {
        self.states.get(key).cloned()
    }

    fn put(&mut self, key: &Plate, state: SessionState) {
        self.states.insert(key.clone(), state);
    }

    fn delete(&mut self, key: &Plate) {
        self.states.remove(key);
    }
}

/// Handle to a registered timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

/// Processing-time timer registration
pub trait Scheduler {
    /// Register a timer firing `delay` after the scheduler's current time
    fn schedule(&mut self, key: &Plate, delay: Duration) -> TimerId;
    /// Cancel every timer registered for `key`
    fn cancel_all(&mut self, key: &Plate);
}

/// Per-plate billing processor
pub struct KeyedSessionProcessor<S, T> {
    pub(crate) store: S,
    pub(crate) timers: T,
    pub(crate) timer_interval: Duration,
}

impl<S: StateStore, T: Scheduler> KeyedSessionProcessor<S, T> {
    pub fn new(store: S, timers: T) -> Self {
        Self::with_timer_interval(store, timers, BILLING_TIMER_INTERVAL)
    }

    pub fn with_timer_interval(store: S, timers: T, timer_interval: Duration) -> Self {
        Self { store, timers, timer_interval }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn timers(&self) -> &T {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    /// Consume the events that arrived for `key` since the last call.
    ///
    /// Only the latest event by `timestamp_unix` is applied (first one wins on
    /// ties), and every figure is recomputed from the stored parking start, so
    /// redelivered events never bill twice.
    pub fn handle_events(
        &mut self,
        key: &Plate,
        events: &[RawEvent],
        now: DateTime<Utc>,
    ) -> Vec<BillingEvent> {
        let Some(latest) = latest_event(events) else {
            return Vec::new();
        };

        let event_time = latest.event_time().unwrap_or_else(|| {
            debug!(plate = %key, timestamp = %latest.timestamp, "event_time_fallback_to_now");
            now
        });
        let state = self.store.get(key);

        let emitted = match latest.status_code {
            VehicleStatus::Entering => self.on_entering(key, latest, state, event_time),
            VehicleStatus::Parked => self.on_parked(key, latest, state, event_time),
            VehicleStatus::Moving => self.on_moving(key, latest, state, event_time),
            VehicleStatus::Exiting => self.on_exiting(key, latest, state, event_time),
        };
        emitted.into_iter().collect()
    }

    /// Timer callback: re-bill a parked vehicle up to `now` and re-arm
    pub fn handle_timer(&mut self, key: &Plate, now: DateTime<Utc>) -> Option<BillingEvent> {
        self.on_timer(key, now)
    }

    /// Re-arm timers for parked sessions after state was restored from a
    /// checkpoint (timers are not persisted)
    pub fn rearm_parked<'a>(&mut self, parked: impl IntoIterator<Item = &'a Plate>) -> usize {
        let mut armed = 0;
        for key in parked {
            if self.store.get(key).is_some_and(|s| s.status == VehicleStatus::Parked) {
                self.timers.schedule(key, self.timer_interval);
                armed += 1;
            }
        }
        armed
    }
}

/// First event carrying the largest `timestamp_unix`
fn latest_event(events: &[RawEvent]) -> Option<&RawEvent> {
    events.iter().fold(None, |best: Option<&RawEvent>, event| match best {
        Some(b) if b.timestamp_unix >= event.timestamp_unix => Some(b),
        _ => Some(event),
    })
}
