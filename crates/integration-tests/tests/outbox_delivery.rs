//! Transactional outbox delivery through the poller.

use std::collections::HashSet;
use std::time::Duration;

use uuid::Uuid;

use cartkeeper::outbox::{CartEvent, OutboxConfig, OutboxPoller, TickOutcome};
use cartkeeper_core::{EventKind, EventStatus, Money};
use cartkeeper_integration_tests::{CLIENT, Harness, PRODUCT, RecordingPublisher};

fn is_mutation(key: &str) -> bool {
    [
        EventKind::ItemAdded,
        EventKind::ItemRemoved,
        EventKind::PaymentSettled,
    ]
    .iter()
    .any(|kind| kind.routing_key() == key)
}

#[tokio::test]
async fn test_each_committed_mutation_is_delivered_once() {
    let h = Harness::new().await;

    h.carts.add_item(CLIENT, PRODUCT, 2).await.unwrap();
    h.carts.add_item(CLIENT, PRODUCT, 1).await.unwrap();
    h.carts.remove_item(CLIENT, PRODUCT).await.unwrap();
    // Rejected: leaves a failure event but no mutation event
    h.carts.add_item(CLIENT, PRODUCT, 50).await.unwrap_err();
    h.checkout.pay(CLIENT).await.unwrap();

    let events = h.store.events().await;
    let mutations = events.iter().filter(|e| is_mutation(&e.key)).count();
    assert_eq!(mutations, 4);
    assert!(events.iter().all(|e| e.status == EventStatus::New));

    let publisher = RecordingPublisher::default();
    let poller = OutboxPoller::new(h.store.clone(), publisher.clone(), OutboxConfig::default());
    let result = poller.drain(None).await.unwrap();
    assert_eq!(result.delivered, events.len());

    let events = h.store.events().await;
    assert!(events.iter().all(|e| e.status == EventStatus::Done));

    let delivered = publisher.delivered();
    let ids: HashSet<Uuid> = delivered.iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), delivered.len());
    let rows: HashSet<Uuid> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, rows);

    // Payloads carry the identifiers consumers deduplicate on
    let first = delivered[0].decode().unwrap();
    assert_eq!(
        first,
        CartEvent::ItemAdded {
            client_id: CLIENT,
            product_id: PRODUCT,
            quantity: 2,
            unit_price: Money::from_cents(1000),
            line_quantity: 2,
        }
    );
}

#[tokio::test]
async fn test_failed_publish_is_retried_without_duplicating_the_row() {
    let h = Harness::new().await;
    h.carts.add_item(CLIENT, PRODUCT, 1).await.unwrap();
    let id = h.store.events().await[0].id;

    let publisher = RecordingPublisher::default();
    let poller = OutboxPoller::new(h.store.clone(), publisher.clone(), OutboxConfig::default());

    publisher.set_failing(true);
    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Released(id));
    assert_eq!(h.store.events().await[0].status, EventStatus::New);
    assert!(publisher.delivered().is_empty());

    publisher.set_failing(false);
    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Delivered(id));
    assert_eq!(poller.tick().await.unwrap(), TickOutcome::Idle);

    let events = h.store.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, EventStatus::Done);
    assert_eq!(publisher.delivered().len(), 1);
}

#[tokio::test]
async fn test_rolled_back_mutation_leaves_no_event() {
    let h = Harness::new().await;

    h.store.fail_event_appends(true);
    h.carts.add_item(CLIENT, PRODUCT, 1).await.unwrap_err();
    h.store.fail_event_appends(false);

    assert!(h.store.events().await.is_empty());
    assert_eq!(h.stock(PRODUCT).await, 5);
}

#[tokio::test]
async fn test_background_poller_drains_and_stops() {
    let h = Harness::new().await;
    let publisher = RecordingPublisher::default();
    let config = OutboxConfig {
        poll_interval: Duration::from_millis(10),
        ..OutboxConfig::default()
    };
    let handle = OutboxPoller::new(h.store.clone(), publisher.clone(), config).start();

    h.carts.add_item(CLIENT, PRODUCT, 1).await.unwrap();
    h.carts.remove_item(CLIENT, PRODUCT).await.unwrap();

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while publisher.delivered().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "poller did not deliver in time");

    handle.stop().await;

    let keys: Vec<_> = publisher.delivered().into_iter().map(|m| m.key).collect();
    assert_eq!(
        keys,
        vec![
            EventKind::ItemAdded.routing_key(),
            EventKind::ItemRemoved.routing_key()
        ]
    );
}
