//! Processing-time timer queue for the session processor
//!
//! Deadlines are measured against the queue's own clock, which the host
//! moves forward with `advance_to` (wall clock in production, simulated time
//! in tests).

use crate::domain::Plate;
use crate::services::session_processor::{Scheduler, TimerId};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug)]
pub struct TimerQueue {
    now: DateTime<Utc>,
    next_id: u64,
    /// Ordered by deadline, then registration order
    by_deadline: BTreeMap<(DateTime<Utc>, TimerId), Plate>,
    /// Timers registered per key, for cancellation
    by_key: FxHashMap<Plate, SmallVec<[(DateTime<Utc>, TimerId); 2]>>,
}

impl TimerQueue {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            next_id: 1,
            by_deadline: BTreeMap::new(),
            by_key: FxHashMap::default(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Move the clock forward; never moves it backwards
    pub fn advance_to(&mut self, now: DateTime<Utc>) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Register a timer at an absolute deadline
    pub fn schedule_at(&mut self, key: &Plate, deadline: DateTime<Utc>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.by_deadline.insert((deadline, id), key.clone());
        self.by_key.entry(key.clone()).or_default().push((deadline, id));
        id
    }

    /// Advance the clock to `now` and remove every timer due at or before it,
    /// earliest first
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<(Plate, TimerId)> {
        self.advance_to(now);
        let mut due = Vec::new();
        while let Some(entry) = self.by_deadline.first_entry() {
            if entry.key().0 > self.now {
                break;
            }
            let ((_, id), key) = entry.remove_entry();
            if let Some(timers) = self.by_key.get_mut(&key) {
                timers.retain(|(_, t)| *t != id);
                if timers.is_empty() {
                    self.by_key.remove(&key);
                }
            }
            due.push((key, id));
        }
        due
    }

    /// Number of timers registered for `key`
    pub fn pending(&self, key: &Plate) -> usize {
        self.by_key.get(key).map_or(0, |timers| timers.len())
    }

    /// Earliest deadline for `key`
    pub fn deadline_for(&self, key: &Plate) -> Option<DateTime<Utc>> {
        self.by_key.get(key).and_then(|timers| timers.iter().map(|(at, _)| *at).min())
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.by_deadline.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.by_deadline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_deadline.is_empty()
    }
}

impl Scheduler for TimerQueue {
    fn schedule(&mut self, key: &Plate, delay: Duration) -> TimerId {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let deadline = self.now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.schedule_at(key, deadline)
    }

    fn cancel_all(&mut self, key: &Plate) {
        if let Some(timers) = self.by_key.remove(key) {
            for (deadline, id) in timers {
                self.by_deadline.remove(&(deadline, id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
    }

    fn mins(m: i64) -> chrono::Duration {
        chrono::Duration::minutes(m)
    }

    #[test]
    fn test_schedule_relative_to_clock() {
        let mut timers = TimerQueue::new(t0());
        let key = Plate::from("29A-12345");
        timers.schedule(&key, Duration::from_secs(60));

        assert_eq!(timers.next_deadline(), Some(t0() + mins(1)));
        assert!(timers.pop_due(t0() + chrono::Duration::seconds(59)).is_empty());
        let due = timers.pop_due(t0() + mins(1));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, key);
        assert!(timers.is_empty());
        assert_eq!(timers.pending(&key), 0);
    }

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut timers = TimerQueue::new(t0());
        timers.schedule_at(&"B".into(), t0() + mins(2));
        timers.schedule_at(&"A".into(), t0() + mins(1));
        timers.schedule_at(&"C".into(), t0() + mins(5));

        let due: Vec<_> = timers.pop_due(t0() + mins(3)).into_iter().map(|(k, _)| k).collect();
        assert_eq!(due, vec![Plate::from("A"), Plate::from("B")]);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_cancel_all_removes_only_that_key() {
        let mut timers = TimerQueue::new(t0());
        let a = Plate::from("29A-12345");
        let b = Plate::from("30B-12345");
        timers.schedule(&a, Duration::from_secs(60));
        timers.schedule(&a, Duration::from_secs(120));
        timers.schedule(&b, Duration::from_secs(60));

        timers.cancel_all(&a);

        assert_eq!(timers.pending(&a), 0);
        assert_eq!(timers.pending(&b), 1);
        let due = timers.pop_due(t0() + mins(10));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, b);
    }

    #[test]
    fn test_clock_never_moves_backwards() {
        let mut timers = TimerQueue::new(t0());
        timers.advance_to(t0() + mins(5));
        timers.advance_to(t0());
        assert_eq!(timers.now(), t0() + mins(5));
    }
}
