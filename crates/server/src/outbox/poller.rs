//! Background worker that drains the outbox to the event channel.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

use super::{EventPublisher, OutboxMessage};
use crate::db::{RepositoryError, Store};

/// Poller timing.
#[derive(Debug, Clone, Copy)]
pub struct OutboxConfig {
    /// Delay between polls when the outbox is empty or the store fails.
    pub poll_interval: Duration,
    /// How long a claimed row stays invisible to other pollers.
    pub claim_lease: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            claim_lease: Duration::from_secs(30),
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was deliverable.
    Idle,
    /// A row was published and marked done.
    Delivered(Uuid),
    /// Publishing failed; the row went back to `new`.
    Released(Uuid),
}

/// Totals from [`OutboxPoller::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainResult {
    pub delivered: usize,
    pub released: usize,
}

/// Delivers outbox rows one at a time, oldest first.
pub struct OutboxPoller<S, P> {
    store: S,
    publisher: P,
    config: OutboxConfig,
}

impl<S: Store, P: EventPublisher> OutboxPoller<S, P> {
    pub const fn new(store: S, publisher: P, config: OutboxConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Claim, publish and settle one row.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be reached. A publish
    /// failure is not an error; the row is released for a later attempt.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickOutcome, RepositoryError> {
        let Some(event) = self.store.claim_next_event(self.config.claim_lease).await? else {
            return Ok(TickOutcome::Idle);
        };

        let message = OutboxMessage::from(&event);
        match self.publisher.publish(&message).await {
            Ok(()) => {
                if !self.store.mark_event_done(event.id).await? {
                    // Lease expired and another poller took the row over.
                    tracing::warn!(event_id = %event.id, "Event no longer in flight after publish");
                }
                tracing::debug!(event_id = %event.id, key = %event.key, "Event delivered");
                Ok(TickOutcome::Delivered(event.id))
            }
            Err(e) => {
                tracing::warn!(event_id = %event.id, key = %event.key, error = %e, "Publish failed, releasing event");
                self.store.release_event(event.id).await?;
                Ok(TickOutcome::Released(event.id))
            }
        }
    }

    /// Deliver until the outbox is empty, a publish fails, or `limit` rows
    /// have been handled.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the store cannot be reached.
    pub async fn drain(&self, limit: Option<usize>) -> Result<DrainResult, RepositoryError> {
        let mut result = DrainResult::default();

        while limit.is_none_or(|max| result.delivered + result.released < max) {
            match self.tick().await? {
                TickOutcome::Idle => break,
                TickOutcome::Delivered(_) => result.delivered += 1,
                TickOutcome::Released(_) => {
                    result.released += 1;
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Run the poller on a background task until the handle is stopped.
    pub fn start(self) -> PollerHandle {
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(poll_interval = ?self.config.poll_interval, "Outbox poller started");

            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {}
                }

                loop {
                    if *stopped.borrow() {
                        break;
                    }
                    match self.tick().await {
                        Ok(TickOutcome::Delivered(_)) => {}
                        Ok(TickOutcome::Idle | TickOutcome::Released(_)) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "Outbox poll failed");
                            break;
                        }
                    }
                }
            }

            tracing::info!("Outbox poller stopped");
        });

        PollerHandle { stop, task }
    }
}

/// Handle to a running poller.
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the poller and wait for the in-progress tick to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Outbox poller task panicked");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::NewOutboxEvent;
    use crate::outbox::{BroadcastPublisher, CartEvent};
    use cartkeeper_core::EventStatus;

    fn event(query: &str) -> NewOutboxEvent {
        CartEvent::ProductsNotFound {
            query: query.to_owned(),
        }
        .to_outbox()
        .unwrap()
    }

    #[tokio::test]
    async fn drain_delivers_in_creation_order() {
        let store = MemoryStore::new();
        store.append_event(&event("a")).await.unwrap();
        store.append_event(&event("b")).await.unwrap();

        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        let poller = OutboxPoller::new(store.clone(), publisher, OutboxConfig::default());

        let result = poller.drain(None).await.unwrap();
        assert_eq!(result, DrainResult { delivered: 2, released: 0 });

        let first = rx.recv().await.unwrap().decode().unwrap();
        let second = rx.recv().await.unwrap().decode().unwrap();
        assert_eq!(first, CartEvent::ProductsNotFound { query: "a".to_owned() });
        assert_eq!(second, CartEvent::ProductsNotFound { query: "b".to_owned() });

        let events = store.events().await;
        assert!(events.iter().all(|e| e.status == EventStatus::Done));
    }

    #[tokio::test]
    async fn failed_publish_leaves_event_for_retry() {
        let store = MemoryStore::new();
        let id = store.append_event(&event("a")).await.unwrap();

        // No subscriber: the broadcast publisher rejects the message.
        let publisher = BroadcastPublisher::new(8);
        let poller = OutboxPoller::new(store.clone(), publisher.clone(), OutboxConfig::default());

        assert_eq!(poller.tick().await.unwrap(), TickOutcome::Released(id));
        assert_eq!(store.events().await[0].status, EventStatus::New);

        let _rx = publisher.subscribe();
        assert_eq!(poller.tick().await.unwrap(), TickOutcome::Delivered(id));
        assert_eq!(poller.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn drain_respects_limit() {
        let store = MemoryStore::new();
        for q in ["a", "b", "c"] {
            store.append_event(&event(q)).await.unwrap();
        }
        let publisher = BroadcastPublisher::new(8);
        let _rx = publisher.subscribe();
        let poller = OutboxPoller::new(store, publisher, OutboxConfig::default());

        let result = poller.drain(Some(2)).await.unwrap();
        assert_eq!(result.delivered, 2);
    }

    #[tokio::test]
    async fn started_poller_delivers_and_stops() {
        let store = MemoryStore::new();
        store.append_event(&event("a")).await.unwrap();

        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        let config = OutboxConfig {
            poll_interval: Duration::from_millis(10),
            ..OutboxConfig::default()
        };
        let handle = OutboxPoller::new(store.clone(), publisher, config).start();

        let delivered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.key, "products-not-found");

        handle.stop().await;
    }
}
