//! Event channel publishers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::CartEvent;
use crate::models::OutboxEvent;

/// Message handed to the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Outbox row ID; stable across redeliveries.
    pub id: Uuid,
    /// Routing key.
    pub key: String,
    /// Serialized [`CartEvent`].
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the payload is not a known event.
    pub fn decode(&self) -> Result<CartEvent, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

impl From<&OutboxEvent> for OutboxMessage {
    fn from(event: &OutboxEvent) -> Self {
        Self {
            id: event.id,
            key: event.key.clone(),
            payload: event.message.clone(),
            created_at: event.created_at,
        }
    }
}

/// Errors raised while handing a message to the channel.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Nobody is listening; the message would be lost.
    #[error("no subscribers on the event channel")]
    NoSubscribers,

    /// The transport rejected the message.
    #[error("event channel error: {0}")]
    Channel(String),
}

/// A single logical topic that outbox messages are delivered to.
#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    /// Deliver one message. `Ok` means the channel accepted it.
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError>;
}

/// Publisher that writes every message to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        tracing::info!(
            target: "cartkeeper::events",
            event_id = %message.id,
            key = %message.key,
            payload = %message.payload,
            "Event published"
        );
        Ok(())
    }
}

/// Publisher fanning messages out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<OutboxMessage>,
}

impl BroadcastPublisher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to messages published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        self.sender
            .send(message.clone())
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers)
    }
}
