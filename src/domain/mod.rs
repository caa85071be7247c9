//! Domain models - core business types for the parking facility
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - plates, locations, vehicle status and the wire records
//! - `catalog` - static plate and location catalogs
//! - `billing` - block pricing formula
//! - `snapshot` - facility-wide occupancy and revenue view

pub mod billing;
pub mod catalog;
pub mod snapshot;
pub mod types;

// Re-export commonly used types at module level
pub use billing::{Charge, BLOCK_MINUTES, BLOCK_PRICE};
pub use snapshot::{render_snapshot, FacilitySnapshot};
pub use types::{BillingAction, BillingEvent, EventKind, Location, Plate, RawEvent, VehicleStatus};
