//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand billing events and metrics to the
//! MQTT publisher. Uses a bounded mpsc channel to prevent unbounded memory
//! growth; messages are dropped (and counted) when it is full.

use crate::domain::{BillingEvent, Plate};
use crate::infra::metrics::{Metrics, MetricsSummary};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Billing event, published under the plate's topic (QoS 1)
    Billing(BillingPayload),
    /// Periodic metrics snapshot (QoS 0)
    Metrics(MetricsPayload),
}

#[derive(Debug)]
pub struct BillingPayload {
    pub plate: Plate,
    pub json: String,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: i64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Option<Arc<Metrics>>,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id, metrics: None }
    }

    /// Count dropped messages in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue a billing event for publishing
    pub fn send_billing(&self, event: &BillingEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let payload = BillingPayload { plate: event.license_plate.clone(), json };
                self.try_send(EgressMessage::Billing(payload));
            }
            Err(e) => warn!(plate = %event.license_plate, error = %e, "billing_encode_failed"),
        }
    }

    /// Queue a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload {
            site: self.site_id.clone(),
            ts: chrono::Utc::now().timestamp_millis(),
            summary,
        };
        self.try_send(EgressMessage::Metrics(payload));
    }

    fn try_send(&self, msg: EgressMessage) {
        // try_send so the runtime never blocks on a slow broker
        if self.tx.try_send(msg).is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.record_egress_dropped();
            }
        }
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// site_id is included in metrics payloads for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
