//! Transactional outbox.
//!
//! Domain events are appended as `events` rows inside the transaction of the
//! mutation they describe, so a row exists if and only if the mutation
//! committed. [`OutboxPoller`] drains rows to an [`EventPublisher`]
//! independently of request handling:
//!
//! ```text
//! new --claim--> in_flight --publish ok--> done
//!                    |
//!                    +--publish failed--> new  (retried next tick)
//! ```
//!
//! Delivery is at-least-once. Every message carries the row ID and the
//! business identifiers consumers need to deduplicate.

pub mod events;
pub mod poller;
pub mod publisher;

pub use events::CartEvent;
pub use poller::{DrainResult, OutboxConfig, OutboxPoller, PollerHandle, TickOutcome};
pub use publisher::{
    BroadcastPublisher, EventPublisher, LogPublisher, OutboxMessage, PublishError,
};
