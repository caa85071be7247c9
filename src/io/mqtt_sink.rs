//! MQTT producer for simulated raw events
//!
//! Each event goes to `<topic>/<plate>` at QoS 1 so a plate's events stay
//! ordered on one subtopic. Publishes are retried with backoff while the
//! client queue is unavailable.

use crate::domain::RawEvent;
use crate::infra::config::Config;
use crate::io::event_sink::{EventSink, PublishError};
use crate::io::retry::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long `flush` waits for outstanding acknowledgements
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_POLL: Duration = Duration::from_millis(50);

pub struct MqttEventSink {
    client: AsyncClient,
    topic: String,
    retry: RetryConfig,
    published: u64,
    acked: Arc<AtomicU64>,
    eventloop_task: JoinHandle<()>,
}

impl MqttEventSink {
    /// Connect to the configured broker; the client event loop runs on its
    /// own task until the sink is dropped
    pub fn connect(config: &Config) -> Self {
        // Unique per run so concurrent simulators do not kick each other off
        let client_id = format!("{}-sim-{}", config.mqtt_client_id(), Uuid::now_v7().simple());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        let acked = Arc::new(AtomicU64::new(0));
        let acked_loop = acked.clone();

        let eventloop_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_sink_connected"),
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        acked_loop.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_sink_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let retry = RetryConfig::default().with_max_attempts(config.simulator().publish_attempts);
        Self {
            client,
            topic: config.raw_topic().trim_end_matches('/').to_string(),
            retry,
            published: 0,
            acked,
            eventloop_task,
        }
    }

    fn topic_for(&self, event: &RawEvent) -> String {
        format!("{}/{}", self.topic, event.license_plate)
    }
}

#[async_trait]
impl EventSink for MqttEventSink {
    async fn publish(&mut self, event: &RawEvent) -> Result<(), PublishError> {
        let topic = self.topic_for(event);
        let payload = serde_json::to_vec(event)?;
        let client = &self.client;

        retry_with_backoff(
            &self.retry,
            || {
                let topic = topic.clone();
                let payload = payload.clone();
                async move {
                    client
                        .try_publish(topic, QoS::AtLeastOnce, false, payload)
                        .map_err(PublishError::from)
                }
            },
            PublishError::is_transient,
            "publish_raw_event",
        )
        .await?;

        self.published += 1;
        debug!(topic = %topic, status = %event.status_code.as_str(), "raw_event_published");
        Ok(())
    }

    /// Wait until the broker acknowledged everything published so far, or
    /// give up after `FLUSH_TIMEOUT`
    async fn flush(&mut self) -> Result<(), PublishError> {
        let deadline = tokio::time::Instant::now() + FLUSH_TIMEOUT;
        while self.acked.load(Ordering::Relaxed) < self.published {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    published = %self.published,
                    acked = %self.acked.load(Ordering::Relaxed),
                    "mqtt_sink_flush_timeout"
                );
                break;
            }
            tokio::time::sleep(FLUSH_POLL).await;
        }
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "mqtt_sink_disconnect_failed");
        }
        Ok(())
    }
}

impl Drop for MqttEventSink {
    fn drop(&mut self) {
        self.eventloop_task.abort();
    }
}
