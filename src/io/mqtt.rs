//! MQTT client for receiving raw vehicle events
//!
//! Subscribes to `<input_topic>/#` so both the bare topic and the per-plate
//! subtopics the simulator publishes to are consumed.

use crate::domain::RawEvent;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("invalid raw event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Decode one bus payload into a raw event.
///
/// Unknown `status_code` values fail here, along with malformed JSON.
pub fn parse_raw_event(payload: &[u8]) -> Result<RawEvent, IngressError> {
    let json = std::str::from_utf8(payload)?;
    Ok(serde_json::from_str(json)?)
}

/// Subscription filter covering the input topic and its per-plate subtopics
pub fn ingress_filter(input_topic: &str) -> String {
    format!("{}/#", input_topic.trim_end_matches('/'))
}

/// Start the MQTT client and forward decoded events to the runtime
///
/// Events are forwarded with `send().await`, so a full channel applies
/// backpressure to the broker connection instead of dropping input.
pub async fn start_mqtt_ingress(
    config: &Config,
    event_tx: mpsc::Sender<RawEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingress-{}", config.mqtt_client_id(), std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let filter = ingress_filter(config.input_topic());
    client.subscribe(&filter, QoS::AtLeastOnce).await?;

    info!(topic = %filter, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_ingress_subscribed");

    // Rate-limit reject warnings to 1 per second
    let mut last_reject_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_ingress_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match parse_raw_event(&publish.payload) {
                            Ok(event) => {
                                debug!(
                                    topic = %publish.topic,
                                    plate = %event.license_plate,
                                    status = %event.status_code.as_str(),
                                    "raw_event_received"
                                );
                                metrics.record_raw_event_received();
                                if event_tx.send(event).await.is_err() {
                                    warn!("event_channel_closed");
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                metrics.record_raw_event_rejected();
                                if last_reject_warn.elapsed() > Duration::from_secs(1) {
                                    warn!(topic = %publish.topic, error = %e, "raw_event_rejected");
                                    last_reject_warn = Instant::now();
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_ingress_connected");
                        // Clean sessions drop the subscription on reconnect
                        if let Err(e) = client.try_subscribe(&filter, QoS::AtLeastOnce) {
                            warn!(error = %e, "mqtt_resubscribe_failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_ingress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
