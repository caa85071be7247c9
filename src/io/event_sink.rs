//! Destination for raw events produced by the simulator

use crate::domain::RawEvent;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("bus client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("sink closed")]
    Closed,
}

impl PublishError {
    /// Only a full client request queue clears up on its own; a closed
    /// request channel means the event loop is gone
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Client(rumqttc::ClientError::TryRequest(_)))
    }
}

/// Keyed event bus producer
#[async_trait]
pub trait EventSink: Send {
    /// Publish one event, partitioned by its plate
    async fn publish(&mut self, event: &RawEvent) -> Result<(), PublishError>;

    /// Best-effort flush of anything still buffered
    async fn flush(&mut self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// In-process sink feeding a channel, used to wire the simulator straight
/// into a runtime and in tests
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RawEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RawEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&mut self, event: &RawEvent) -> Result<(), PublishError> {
        self.tx.send(event.clone()).await.map_err(|_| PublishError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VehicleStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = ChannelSink::new(tx);
        let now = Utc::now();

        sink.publish(&RawEvent::at("29A-12345".into(), "A1".into(), VehicleStatus::Entering, now))
            .await
            .unwrap();
        sink.publish(&RawEvent::at("29A-12345".into(), "A1".into(), VehicleStatus::Parked, now))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().status_code, VehicleStatus::Entering);
        assert_eq!(rx.recv().await.unwrap().status_code, VehicleStatus::Parked);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink::new(tx);

        let err = sink
            .publish(&RawEvent::at("29A-12345".into(), "A1".into(), VehicleStatus::Entering, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Closed));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_full_queue_is_transient_closed_client_is_not() {
        use rumqttc::{AsyncClient, MqttOptions, QoS};

        let (client, eventloop) = AsyncClient::new(MqttOptions::new("sink-test", "localhost", 1883), 1);
        client.try_publish("parking-raw-events/29A-12345", QoS::AtLeastOnce, false, vec![1]).unwrap();
        let full = client
            .try_publish("parking-raw-events/29A-12345", QoS::AtLeastOnce, false, vec![2])
            .unwrap_err();
        assert!(PublishError::from(full).is_transient());

        drop(eventloop);
        let closed = client
            .publish("parking-raw-events/29A-12345", QoS::AtLeastOnce, false, vec![3])
            .await
            .unwrap_err();
        assert!(!PublishError::from(closed).is_transient());
    }
}
