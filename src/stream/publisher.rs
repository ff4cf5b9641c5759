use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::event_store::StoredEvent;

use super::topic_for;

/// Message delivered on the event stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamMessage {
    pub topic: String,
    /// Partition key: events of one aggregate keep their order
    pub key: Uuid,
    pub sequence: i64,
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub version: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl From<StoredEvent> for StreamMessage {
    fn from(event: StoredEvent) -> Self {
        Self {
            topic: topic_for(&event.aggregate_type),
            key: event.aggregate_id,
            sequence: event.sequence,
            event_id: event.id,
            aggregate_type: event.aggregate_type,
            version: event.version,
            event_type: event.event_type,
            payload: event.event_data,
            occurred_at: event.created_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Publisher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: StreamMessage) -> Result<(), PublishError>;
}

/// In-process broadcast channel; other components call `subscribe`.
///
/// Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<StreamMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, message: StreamMessage) -> Result<(), PublishError> {
        let topic = message.topic.clone();
        let sequence = message.sequence;
        match self.sender.send(message) {
            Ok(receivers) => {
                tracing::trace!(topic = %topic, sequence, receivers, "Event broadcast");
            }
            Err(_) => {
                tracing::trace!(topic = %topic, sequence, "No stream subscribers");
            }
        }
        Ok(())
    }
}

/// Writes every message to the log
#[derive(Debug, Clone, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, message: StreamMessage) -> Result<(), PublishError> {
        tracing::info!(
            topic = %message.topic,
            key = %message.key,
            sequence = message.sequence,
            event_type = %message.event_type,
            "Stream event"
        );
        Ok(())
    }
}
