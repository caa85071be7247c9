//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `resource_pool` - Plate and bay allocation for simulated vehicles
//! - `vehicle_session` - Per-vehicle status lifecycle
//! - `fleet_simulator` - Raw event generator driving a fleet of vehicles
//! - `session_processor` - Keyed, timer-driven billing
//! - `timer_queue` - Processing-time timers for the billing processor
//! - `session_runtime` - Host loop owning the processor, egress and checkpoints

pub mod fleet_simulator;
pub mod resource_pool;
pub mod session_processor;
pub mod session_runtime;
pub mod timer_queue;
pub mod vehicle_session;

// Re-export commonly used types
pub use fleet_simulator::{FleetConfig, FleetSimulator, SimulatorStats};
pub use resource_pool::ResourcePool;
pub use session_processor::{
    KeyedSessionProcessor, MemoryStateStore, Scheduler, SessionState, StateStore, TimerId,
    BILLING_TIMER_INTERVAL,
};
pub use session_runtime::{LatenessGuard, SessionRuntime};
pub use timer_queue::TimerQueue;
pub use vehicle_session::VehicleSession;
