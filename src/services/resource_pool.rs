//! Plate and location allocation for the fleet simulator
//!
//! Tracks which plates are in use and which bays are occupied, and hands out
//! unused ones. Allocation does not reserve: the simulator reserves a pair
//! once the session that owns it is actually in the fleet.

use crate::domain::catalog::{LOCATIONS, PLATES};
use crate::domain::{Location, Plate};
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;
use tracing::warn;

#[derive(Debug)]
pub struct ResourcePool {
    plates: &'static [&'static str],
    locations: &'static [&'static str],
    active_plates: FxHashSet<Plate>,
    occupied_locations: FxHashSet<Location>,
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(&PLATES, &LOCATIONS)
    }
}

impl ResourcePool {
    pub fn new(plates: &'static [&'static str], locations: &'static [&'static str]) -> Self {
        Self {
            plates,
            locations,
            active_plates: FxHashSet::default(),
            occupied_locations: FxHashSet::default(),
        }
    }

    /// Pick a plate not currently in use.
    ///
    /// When every plate is taken, falls back to any plate in the catalog.
    pub fn allocate_plate<R: Rng>(&self, rng: &mut R) -> Plate {
        let free: Vec<&str> = self
            .plates
            .iter()
            .copied()
            .filter(|p| !self.active_plates.contains(&Plate::from(*p)))
            .collect();
        match free.choose(rng) {
            Some(plate) => Plate::from(*plate),
            None => {
                warn!(active = self.active_plates.len(), "plate_pool_exhausted");
                Plate::from(self.plates.choose(rng).copied().unwrap_or_default())
            }
        }
    }

    /// Pick a location not currently occupied.
    ///
    /// When every bay is taken, falls back to any location in the catalog.
    pub fn allocate_location<R: Rng>(&self, rng: &mut R) -> Location {
        let free: Vec<&str> = self
            .locations
            .iter()
            .copied()
            .filter(|l| !self.occupied_locations.contains(&Location::from(*l)))
            .collect();
        match free.choose(rng) {
            Some(location) => Location::from(*location),
            None => {
                warn!(occupied = self.occupied_locations.len(), "location_pool_exhausted");
                Location::from(self.locations.choose(rng).copied().unwrap_or_default())
            }
        }
    }

    pub fn reserve(&mut self, plate: &Plate, location: &Location) {
        self.active_plates.insert(plate.clone());
        self.occupied_locations.insert(location.clone());
    }

    /// Release a plate; no-op if it was not in use
    pub fn release_plate(&mut self, plate: &Plate) {
        self.active_plates.remove(plate);
    }

    /// Release a location; no-op if it was not occupied
    pub fn release_location(&mut self, location: &Location) {
        self.occupied_locations.remove(location);
    }

    /// True while at least one plate and one location are free
    pub fn has_capacity(&self) -> bool {
        self.active_plates.len() < self.plates.len()
            && self.occupied_locations.len() < self.locations.len()
    }

    pub fn is_plate_active(&self, plate: &Plate) -> bool {
        self.active_plates.contains(plate)
    }

    pub fn is_location_occupied(&self, location: &Location) -> bool {
        self.occupied_locations.contains(location)
    }

    pub fn active_plates(&self) -> usize {
        self.active_plates.len()
    }

    pub fn occupied_locations(&self) -> usize {
        self.occupied_locations.len()
    }
}
