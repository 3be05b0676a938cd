//! Outbox rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use cartkeeper_core::{EventKind, EventStatus};

/// A durable outbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEvent {
    /// Unique event ID, also the consumer deduplication key.
    pub id: Uuid,
    /// Routing key (see [`EventKind::routing_key`]).
    pub key: String,
    /// Serialized JSON payload.
    pub message: String,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    /// When the current delivery attempt claimed the row.
    pub claimed_at: Option<DateTime<Utc>>,
}

/// An outbox row about to be appended inside a business transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub kind: EventKind,
    pub message: String,
}
