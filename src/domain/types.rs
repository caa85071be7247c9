//! Shared types for the parking stream

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire format of the `timestamp` field ("YYYY-MM-DD HH:MM:SS", UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Newtype wrapper for license plates (the partition key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plate(pub String);

impl Plate {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Plate {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Plate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for parking locations (e.g. "C7")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(pub String);

impl Location {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Floor label is the leading letter of the location id
    pub fn floor(&self) -> Option<char> {
        self.0.chars().next().filter(|c| c.is_ascii_alphabetic())
    }
}

impl From<&str> for Location {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vehicle lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleStatus {
    Entering,
    Parked,
    Moving,
    Exiting,
}

impl VehicleStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Entering => "ENTERING",
            VehicleStatus::Parked => "PARKED",
            VehicleStatus::Moving => "MOVING",
            VehicleStatus::Exiting => "EXITING",
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status code: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for VehicleStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTERING" => Ok(VehicleStatus::Entering),
            "PARKED" => Ok(VehicleStatus::Parked),
            "MOVING" => Ok(VehicleStatus::Moving),
            "EXITING" => Ok(VehicleStatus::Exiting),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Format a UTC instant in the wire timestamp format
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a wire timestamp string as UTC
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok().map(|dt| dt.and_utc())
}

/// Raw vehicle status sample, as produced by the simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: String,
    pub timestamp_unix: i64,
    pub license_plate: Plate,
    pub location: Location,
    pub status_code: VehicleStatus,
}

impl RawEvent {
    /// Capture a sample at the given wall-clock instant
    pub fn at(plate: Plate, location: Location, status: VehicleStatus, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: format_timestamp(now),
            timestamp_unix: now.timestamp(),
            license_plate: plate,
            location,
            status_code: status,
        }
    }

    /// Event time: `timestamp_unix` first, then the string form.
    ///
    /// Returns `None` when neither field yields a valid instant; callers
    /// substitute processing time.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        if self.timestamp_unix > 0 {
            if let Some(at) = DateTime::from_timestamp(self.timestamp_unix, 0) {
                return Some(at);
            }
        }
        parse_timestamp(&self.timestamp)
    }
}

/// What a billing event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingAction {
    VehicleEntered,
    VehicleParked,
    ParkingUpdated,
    VehicleMoving,
    VehicleExiting,
    PeriodicUpdate,
}

impl BillingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingAction::VehicleEntered => "vehicle_entered",
            BillingAction::VehicleParked => "vehicle_parked",
            BillingAction::ParkingUpdated => "parking_updated",
            BillingAction::VehicleMoving => "vehicle_moving",
            BillingAction::VehicleExiting => "vehicle_exiting",
            BillingAction::PeriodicUpdate => "periodic_update",
        }
    }
}

/// Whether a billing event came from an input event or a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    VehicleEvent,
    TimerEvent,
}

/// Derived billing record emitted by the session processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub timestamp: String,
    pub timestamp_unix: i64,
    pub license_plate: Plate,
    pub location: Location,
    pub status: VehicleStatus,
    pub action: BillingAction,
    pub parked_duration_minutes: f64,
    pub parked_blocks: u32,
    pub total_cost: i64,
    pub event_type: EventKind,
}
