//! Facility occupancy and revenue view derived from billing events
//!
//! `FacilitySnapshot` is a plain value: callers fold billing events into it
//! and hand it to `render_snapshot` for display.

use super::catalog::{BAYS_PER_FLOOR, FLOORS, LOCATIONS};
use super::types::{BillingAction, BillingEvent, Location, Plate, VehicleStatus};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Vehicle currently holding a location
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occupant {
    pub plate: Plate,
    pub status: VehicleStatus,
    pub parked_blocks: u32,
    pub running_cost: i64,
    pub parked_duration_minutes: f64,
    pub last_update: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FacilitySnapshot {
    occupants: BTreeMap<Location, Occupant>,
    #[serde(skip)]
    by_plate: FxHashMap<Plate, Location>,
    collected_revenue: i64,
    completed_sessions: u64,
    messages_processed: u64,
}

impl FacilitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one billing event into the view
    pub fn apply(&mut self, event: &BillingEvent) {
        self.messages_processed += 1;

        // A plate holds at most one location; drop its previous bay first
        if let Some(previous) = self.by_plate.remove(&event.license_plate) {
            if previous != event.location {
                self.vacate(&previous, &event.license_plate);
            }
        }

        if event.action == BillingAction::VehicleExiting {
            // The bay may already belong to a vehicle that arrived after this one left it
            self.vacate(&event.location, &event.license_plate);
            self.collected_revenue += event.total_cost;
            self.completed_sessions += 1;
            return;
        }

        // Another plate still listed at this bay has left without an exit record
        if let Some(stale) = self.occupants.get(&event.location) {
            if stale.plate != event.license_plate {
                self.by_plate.remove(&stale.plate);
            }
        }

        self.by_plate.insert(event.license_plate.clone(), event.location.clone());
        self.occupants.insert(
            event.location.clone(),
            Occupant {
                plate: event.license_plate.clone(),
                status: event.status,
                parked_blocks: event.parked_blocks,
                running_cost: event.total_cost,
                parked_duration_minutes: event.parked_duration_minutes,
                last_update: event.timestamp.clone(),
            },
        );
    }

    /// Free `location` only while `plate` is the vehicle listed there
    fn vacate(&mut self, location: &Location, plate: &Plate) {
        if self.occupants.get(location).is_some_and(|o| &o.plate == plate) {
            self.occupants.remove(location);
        }
    }

    pub fn occupant(&self, location: &Location) -> Option<&Occupant> {
        self.occupants.get(location)
    }

    pub fn occupied(&self) -> usize {
        self.occupants.len()
    }

    pub fn capacity(&self) -> usize {
        LOCATIONS.len()
    }

    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.occupied())
    }

    /// Sum of running costs of vehicles currently parked
    pub fn live_revenue(&self) -> i64 {
        self.occupants
            .values()
            .filter(|o| o.status == VehicleStatus::Parked)
            .map(|o| o.running_cost)
            .sum()
    }

    /// Sum of final costs of completed sessions
    pub fn collected_revenue(&self) -> i64 {
        self.collected_revenue
    }

    pub fn completed_sessions(&self) -> u64 {
        self.completed_sessions
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }

    /// Occupied bay count for one floor
    pub fn occupied_on_floor(&self, floor: char) -> usize {
        self.occupants.keys().filter(|loc| loc.floor() == Some(floor)).count()
    }

    fn count_with_status(&self, status: VehicleStatus) -> usize {
        self.occupants.values().filter(|o| o.status == status).count()
    }
}

/// Render a per-floor occupancy and revenue summary
pub fn render_snapshot(snapshot: &FacilitySnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "occupied {}/{} available {} | parked {} moving {} entering {}",
        snapshot.occupied(),
        snapshot.capacity(),
        snapshot.available(),
        snapshot.count_with_status(VehicleStatus::Parked),
        snapshot.count_with_status(VehicleStatus::Moving),
        snapshot.count_with_status(VehicleStatus::Entering),
    );
    for floor in FLOORS {
        let occupied = snapshot.occupied_on_floor(floor);
        let bar: String = (0..BAYS_PER_FLOOR).map(|i| if i < occupied { '#' } else { '.' }).collect();
        let _ = writeln!(out, "floor {floor} [{bar}] {occupied}/{BAYS_PER_FLOOR}");
    }
    let _ = write!(
        out,
        "revenue live {} collected {} | sessions closed {} | messages {}",
        snapshot.live_revenue(),
        snapshot.collected_revenue(),
        snapshot.completed_sessions(),
        snapshot.messages_processed(),
    );
    out
}
