//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client consuming raw vehicle events
//! - `mqtt_sink` - MQTT producer used by the simulator
//! - `mqtt_egress` - MQTT publisher for billing events and metrics
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `egress` - Billing output to file (JSONL format)
//! - `event_sink` - Producer seam shared by the MQTT and in-process sinks
//! - `checkpoint` - Durable snapshot of keyed session state
//! - `retry` - Exponential backoff for bus publishes
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod checkpoint;
pub mod egress;
pub mod egress_channel;
pub mod event_sink;
pub mod mqtt;
pub mod mqtt_egress;
pub mod mqtt_sink;
pub mod prometheus;
pub mod retry;

// Re-export commonly used types
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use egress::Egress;
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use event_sink::{ChannelSink, EventSink, PublishError};
pub use mqtt::{parse_raw_event, start_mqtt_ingress};
pub use mqtt_egress::MqttPublisher;
pub use mqtt_sink::MqttEventSink;
pub use retry::{retry_with_backoff, RetryConfig};
