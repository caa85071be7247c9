//! Status handlers for the keyed session processor

use super::{KeyedSessionProcessor, Scheduler, SessionState, StateStore};
use crate::domain::types::format_timestamp;
use crate::domain::{BillingAction, BillingEvent, Charge, EventKind, Plate, RawEvent, VehicleStatus};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Billing record echoing the triggering raw event
fn vehicle_event(
    event: &RawEvent,
    status: VehicleStatus,
    action: BillingAction,
    duration_minutes: f64,
    blocks: u32,
    cost: i64,
) -> BillingEvent {
    BillingEvent {
        timestamp: event.timestamp.clone(),
        timestamp_unix: event.timestamp_unix,
        license_plate: event.license_plate.clone(),
        location: event.location.clone(),
        status,
        action,
        parked_duration_minutes: duration_minutes,
        parked_blocks: blocks,
        total_cost: cost,
        event_type: EventKind::VehicleEvent,
    }
}

impl<S: StateStore, T: Scheduler> KeyedSessionProcessor<S, T> {
    pub(super) fn on_entering(
        &mut self,
        key: &Plate,
        event: &RawEvent,
        state: Option<SessionState>,
        event_time: DateTime<Utc>,
    ) -> Option<BillingEvent> {
        if state.as_ref().is_some_and(|s| s.status != VehicleStatus::Exiting) {
            debug!(plate = %key, "entering_ignored_session_open");
            return None;
        }

        self.store.put(
            key,
            SessionState {
                location: event.location.clone(),
                status: VehicleStatus::Entering,
                parked_start: None,
                last_update: event_time,
                parked_blocks: 0,
                total_cost: 0,
            },
        );
        info!(plate = %key, location = %event.location, "vehicle_entered");
        Some(vehicle_event(event, VehicleStatus::Entering, BillingAction::VehicleEntered, 0.0, 0, 0))
    }

    pub(super) fn on_parked(
        &mut self,
        key: &Plate,
        event: &RawEvent,
        state: Option<SessionState>,
        event_time: DateTime<Utc>,
    ) -> Option<BillingEvent> {
        let continuing = state.as_ref().filter(|s| s.status == VehicleStatus::Parked);

        let Some(current) = continuing else {
            let charge = Charge::minimum();
            self.store.put(
                key,
                SessionState {
                    location: event.location.clone(),
                    status: VehicleStatus::Parked,
                    parked_start: Some(event_time),
                    last_update: event_time,
                    parked_blocks: charge.blocks,
                    total_cost: charge.cost,
                },
            );
            self.timers.schedule(key, self.timer_interval);
            info!(plate = %key, location = %event.location, "vehicle_parked");
            return Some(vehicle_event(
                event,
                VehicleStatus::Parked,
                BillingAction::VehicleParked,
                0.0,
                charge.blocks,
                charge.cost,
            ));
        };

        let (start, charge) = match current.parked_start {
            Some(start) => (start, Charge::between(start, event_time)),
            None => {
                warn!(plate = %key, "parked_start_missing_restarting");
                (event_time, Charge::minimum())
            }
        };
        self.store.put(
            key,
            SessionState {
                location: event.location.clone(),
                status: VehicleStatus::Parked,
                parked_start: Some(start),
                last_update: event_time,
                parked_blocks: charge.blocks,
                total_cost: charge.cost,
            },
        );
        debug!(plate = %key, blocks = %charge.blocks, cost = %charge.cost, "parking_updated");
        Some(vehicle_event(
            event,
            VehicleStatus::Parked,
            BillingAction::ParkingUpdated,
            charge.duration_minutes,
            charge.blocks,
            charge.cost,
        ))
    }

    pub(super) fn on_moving(
        &mut self,
        key: &Plate,
        event: &RawEvent,
        state: Option<SessionState>,
        event_time: DateTime<Utc>,
    ) -> Option<BillingEvent> {
        let Some(current) = state else {
            debug!(plate = %key, "moving_without_session");
            return None;
        };

        let duration = current
            .parked_start
            .map_or(0.0, |start| Charge::minutes_between(start, event_time));
        self.timers.cancel_all(key);
        self.store.put(
            key,
            SessionState {
                status: VehicleStatus::Moving,
                last_update: event_time,
                ..current.clone()
            },
        );
        info!(plate = %key, cost = %current.total_cost, "vehicle_moving");
        Some(vehicle_event(
            event,
            VehicleStatus::Moving,
            BillingAction::VehicleMoving,
            duration,
            current.parked_blocks,
            current.total_cost,
        ))
    }

    pub(super) fn on_exiting(
        &mut self,
        key: &Plate,
        event: &RawEvent,
        state: Option<SessionState>,
        event_time: DateTime<Utc>,
    ) -> Option<BillingEvent> {
        let Some(current) = state else {
            debug!(plate = %key, "exiting_without_session");
            return None;
        };

        let charge = match current.parked_start {
            Some(start) => Charge::between(start, event_time),
            None => Charge {
                duration_minutes: 0.0,
                blocks: current.parked_blocks,
                cost: current.total_cost,
            },
        };
        self.timers.cancel_all(key);
        self.store.delete(key);
        info!(
            plate = %key,
            minutes = format!("{:.1}", charge.duration_minutes),
            blocks = %charge.blocks,
            cost = %charge.cost,
            "vehicle_exiting"
        );
        Some(vehicle_event(
            event,
            VehicleStatus::Exiting,
            BillingAction::VehicleExiting,
            charge.duration_minutes,
            charge.blocks,
            charge.cost,
        ))
    }

    pub(super) fn on_timer(&mut self, key: &Plate, now: DateTime<Utc>) -> Option<BillingEvent> {
        let current = match self.store.get(key) {
            Some(state) if state.status == VehicleStatus::Parked => state,
            _ => {
                debug!(plate = %key, "timer_ignored_not_parked");
                return None;
            }
        };

        let (start, charge) = match current.parked_start {
            Some(start) => (start, Charge::between(start, now)),
            None => {
                warn!(plate = %key, "parked_start_missing_restarting");
                (now, Charge::minimum())
            }
        };
        self.store.put(
            key,
            SessionState {
                parked_start: Some(start),
                last_update: now,
                parked_blocks: charge.blocks,
                total_cost: charge.cost,
                ..current.clone()
            },
        );
        self.timers.schedule(key, self.timer_interval);
        debug!(plate = %key, blocks = %charge.blocks, cost = %charge.cost, "periodic_update");

        Some(BillingEvent {
            timestamp: format_timestamp(now),
            timestamp_unix: now.timestamp(),
            license_plate: key.clone(),
            location: current.location,
            status: VehicleStatus::Parked,
            action: BillingAction::PeriodicUpdate,
            parked_duration_minutes: charge.duration_minutes,
            parked_blocks: charge.blocks,
            total_cost: charge.cost,
            event_type: EventKind::TimerEvent,
        })
    }
}
