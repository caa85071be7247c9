//! Generator-side state machine for one simulated vehicle
//!
//! ENTERING -> PARKED -> MOVING -> EXITING, then the slot is reused by a new
//! vehicle (new plate, new location) starting again at ENTERING.

use crate::domain::{Location, Plate, RawEvent, VehicleStatus};
use crate::services::resource_pool::ResourcePool;
use chrono::{DateTime, Utc};
use rand::Rng;

/// Bounds for the number of PARKED samples before a vehicle moves
pub const PARKED_THRESHOLD_MIN: u32 = 3;
pub const PARKED_THRESHOLD_MAX: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSession {
    pub plate: Plate,
    pub location: Location,
    pub status: VehicleStatus,
    pub parked_event_count: u32,
    pub parked_threshold: u32,
}

impl VehicleSession {
    /// New vehicle at the entrance with an unused plate and bay from the pool
    pub fn new<R: Rng>(pool: &ResourcePool, rng: &mut R) -> Self {
        Self {
            plate: pool.allocate_plate(rng),
            location: pool.allocate_location(rng),
            status: VehicleStatus::Entering,
            parked_event_count: 0,
            parked_threshold: 0,
        }
    }

    /// Current state as a raw event stamped with `now`
    pub fn snapshot(&self, now: DateTime<Utc>) -> RawEvent {
        RawEvent::at(self.plate.clone(), self.location.clone(), self.status, now)
    }

    /// Move one step through the lifecycle
    pub fn advance<R: Rng>(&mut self, pool: &ResourcePool, rng: &mut R) {
        match self.status {
            VehicleStatus::Entering => {
                self.status = VehicleStatus::Parked;
                self.parked_threshold = rng.gen_range(PARKED_THRESHOLD_MIN..=PARKED_THRESHOLD_MAX);
                self.parked_event_count = 0;
            }
            VehicleStatus::Parked => {
                self.parked_event_count += 1;
                if self.parked_event_count >= self.parked_threshold {
                    self.status = VehicleStatus::Moving;
                }
            }
            VehicleStatus::Moving => {
                self.status = VehicleStatus::Exiting;
            }
            VehicleStatus::Exiting => {
                *self = Self::new(pool, rng);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn session() -> VehicleSession {
        VehicleSession {
            plate: "29A-12345".into(),
            location: "A1".into(),
            status: VehicleStatus::Entering,
            parked_event_count: 0,
            parked_threshold: 0,
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = ResourcePool::default();
        let mut vehicle = session();

        vehicle.advance(&pool, &mut rng);
        assert_eq!(vehicle.status, VehicleStatus::Parked);
        assert!((PARKED_THRESHOLD_MIN..=PARKED_THRESHOLD_MAX).contains(&vehicle.parked_threshold));

        let threshold = vehicle.parked_threshold;
        for _ in 1..threshold {
            vehicle.advance(&pool, &mut rng);
            assert_eq!(vehicle.status, VehicleStatus::Parked);
            assert!(vehicle.parked_event_count < vehicle.parked_threshold);
        }
        vehicle.advance(&pool, &mut rng);
        assert_eq!(vehicle.status, VehicleStatus::Moving);

        vehicle.advance(&pool, &mut rng);
        assert_eq!(vehicle.status, VehicleStatus::Exiting);
    }

    #[test]
    fn test_exiting_reinitializes_with_new_identity() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut pool = ResourcePool::default();
        let mut vehicle = VehicleSession { status: VehicleStatus::Exiting, ..session() };
        pool.reserve(&vehicle.plate, &vehicle.location);

        vehicle.advance(&pool, &mut rng);

        assert_eq!(vehicle.status, VehicleStatus::Entering);
        assert_ne!(vehicle.plate, Plate::from("29A-12345"));
        assert_ne!(vehicle.location, Location::from("A1"));
        assert_eq!(vehicle.parked_event_count, 0);
    }

    #[test]
    fn test_snapshot_reflects_current_status() {
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap();
        let vehicle = VehicleSession { status: VehicleStatus::Moving, ..session() };
        let event = vehicle.snapshot(now);

        assert_eq!(event.status_code, VehicleStatus::Moving);
        assert_eq!(event.license_plate, Plate::from("29A-12345"));
        assert_eq!(event.timestamp_unix, now.timestamp());
    }
}
