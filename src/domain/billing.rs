//! Block pricing for parked vehicles
//!
//! Parking is billed per started 10-minute block. A parked vehicle always owes
//! at least one block, so a zero-length (or clock-skewed negative) interval
//! still costs `BLOCK_PRICE`.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Price of one started block (VND)
pub const BLOCK_PRICE: i64 = 10_000;

/// Length of one billing block in minutes
pub const BLOCK_MINUTES: f64 = 10.0;

/// Duration, blocks and amount owed for one parking interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Charge {
    pub duration_minutes: f64,
    pub blocks: u32,
    pub cost: i64,
}

impl Charge {
    /// Nothing parked, nothing owed
    pub const ZERO: Charge = Charge { duration_minutes: 0.0, blocks: 0, cost: 0 };

    /// Charge at the instant parking starts
    pub const fn minimum() -> Self {
        Charge { duration_minutes: 0.0, blocks: 1, cost: BLOCK_PRICE }
    }

    /// Recompute the full charge from the parking start to `until`
    pub fn between(started_at: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        let millis = (until - started_at).num_milliseconds().max(0);
        let duration_minutes = millis as f64 / 60_000.0;
        let blocks = ((duration_minutes / BLOCK_MINUTES).ceil() as u32).max(1);
        Charge { duration_minutes, blocks, cost: i64::from(blocks) * BLOCK_PRICE }
    }

    /// Elapsed minutes only, without billing (used when figures are frozen)
    pub fn minutes_between(started_at: DateTime<Utc>, until: DateTime<Utc>) -> f64 {
        (until - started_at).num_milliseconds().max(0) as f64 / 60_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_started_block_is_billed_in_full() {
        let charge = Charge::between(t0(), t0() + Duration::minutes(25));
        assert_eq!(charge.blocks, 3);
        assert_eq!(charge.cost, 30_000);
        assert!((charge.duration_minutes - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_block_boundaries() {
        assert_eq!(Charge::between(t0(), t0() + Duration::minutes(10)).blocks, 1);
        assert_eq!(Charge::between(t0(), t0() + Duration::seconds(601)).blocks, 2);
        assert_eq!(Charge::between(t0(), t0() + Duration::minutes(61)).blocks, 7);
    }

    #[test]
    fn test_zero_and_negative_intervals_owe_one_block() {
        assert_eq!(Charge::between(t0(), t0()), Charge::minimum());
        let skewed = Charge::between(t0(), t0() - Duration::minutes(5));
        assert_eq!(skewed, Charge::minimum());
    }

    #[test]
    fn test_cost_is_monotonic_in_time() {
        let mut last = 0;
        for minute in 0..180 {
            let charge = Charge::between(t0(), t0() + Duration::minutes(minute));
            assert!(charge.cost >= last);
            last = charge.cost;
        }
    }
}
