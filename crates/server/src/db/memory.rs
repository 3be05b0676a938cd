//! In-process implementation of the store gateway.
//!
//! Backs local development and the test suites. A transaction takes the
//! table lock for its whole lifetime and mutates a private working copy;
//! commit publishes the copy, drop discards it. Holding one lock serializes
//! all transactions, which is stricter than the per-row locks of `PgStore`
//! but gives the same guarantees to callers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use cartkeeper_core::{CartId, ClientId, EventStatus, Money, ProductId};

use super::{RepositoryError, Store, StoreTx};
use crate::models::{CartLine, Client, NewOutboxEvent, OutboxEvent, Product};

#[derive(Debug, Clone, Default)]
struct Tables {
    clients: BTreeMap<ClientId, Client>,
    products: BTreeMap<ProductId, Product>,
    carts: BTreeMap<ClientId, CartId>,
    next_cart_id: i32,
    lines: BTreeMap<(CartId, ProductId), CartLine>,
    events: Vec<OutboxEvent>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_event_appends: AtomicBool,
    unavailable: AtomicBool,
}

/// In-memory store of record.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a client row.
    pub async fn insert_client(&self, client: Client) {
        self.tables.lock().await.clients.insert(client.id, client);
    }

    /// Insert or replace a product row.
    pub async fn insert_product(&self, product: Product) {
        self.tables.lock().await.products.insert(product.id, product);
    }

    pub async fn product(&self, product_id: ProductId) -> Option<Product> {
        self.tables.lock().await.products.get(&product_id).cloned()
    }

    pub async fn client(&self, client_id: ClientId) -> Option<Client> {
        self.tables.lock().await.clients.get(&client_id).cloned()
    }

    /// Committed lines of a client's cart, ordered by product.
    pub async fn lines_of(&self, client_id: ClientId) -> Vec<CartLine> {
        let tables = self.tables.lock().await;
        tables
            .carts
            .get(&client_id)
            .map(|cart_id| tables.lines_of(*cart_id))
            .unwrap_or_default()
    }

    /// Sum of a product's quantity across every cart.
    pub async fn reserved_units(&self, product_id: ProductId) -> i32 {
        self.tables
            .lock()
            .await
            .lines
            .iter()
            .filter(|((_, id), _)| *id == product_id)
            .map(|(_, line)| line.quantity)
            .sum()
    }

    /// All outbox rows in append order.
    pub async fn events(&self) -> Vec<OutboxEvent> {
        self.tables.lock().await.events.clone()
    }

    /// Make every subsequent outbox append fail (fault injection).
    pub fn fail_event_appends(&self, fail: bool) {
        self.faults.fail_event_appends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent operation fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("memory store offline".to_owned()));
        }
        Ok(())
    }
}

impl Tables {
    fn lines_of(&self, cart_id: CartId) -> Vec<CartLine> {
        self.lines
            .range((cart_id, ProductId::new(i32::MIN))..=(cart_id, ProductId::new(i32::MAX)))
            .map(|(_, line)| line.clone())
            .collect()
    }
}

/// An open in-memory transaction.
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    faults: Arc<Faults>,
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, RepositoryError> {
        self.check_available()?;
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let work = guard.clone();

        Ok(MemoryTx {
            guard,
            work,
            faults: Arc::clone(&self.faults),
        })
    }

    async fn ensure_cart(&self, client_id: ClientId) -> Result<CartId, RepositoryError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        if !tables.clients.contains_key(&client_id) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(cart_id) = tables.carts.get(&client_id) {
            return Ok(*cart_id);
        }

        tables.next_cart_id += 1;
        let cart_id = CartId::new(tables.next_cart_id);
        tables.carts.insert(client_id, cart_id);
        Ok(cart_id)
    }

    async fn find_client(&self, client_id: ClientId) -> Result<Option<Client>, RepositoryError> {
        self.check_available()?;
        Ok(self.client(client_id).await)
    }

    async fn search_products(&self, name: &str) -> Result<Vec<Product>, RepositoryError> {
        self.check_available()?;
        let needle = name.to_lowercase();

        Ok(self
            .tables
            .lock()
            .await
            .products
            .values()
            .filter(|product| product.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn claim_next_event(
        &self,
        lease: Duration,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        self.check_available()?;
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| RepositoryError::Conflict(format!("invalid lease: {e}")))?;

        let mut tables = self.tables.lock().await;
        let claimable = tables
            .events
            .iter_mut()
            .filter(|event| {
                event.status.is_deliverable()
                    && (event.status == EventStatus::New
                        || event.claimed_at.is_some_and(|at| at + lease < now))
            })
            .min_by_key(|event| event.created_at);

        Ok(claimable.map(|event| {
            event.status = EventStatus::InFlight;
            event.claimed_at = Some(now);
            event.clone()
        }))
    }

    async fn mark_event_done(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        Ok(match tables.events.iter_mut().find(|event| event.id == id) {
            Some(event) if event.status == EventStatus::InFlight => {
                event.status = EventStatus::Done;
                true
            }
            _ => false,
        })
    }

    async fn release_event(&self, id: Uuid) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;

        Ok(match tables.events.iter_mut().find(|event| event.id == id) {
            Some(event) if event.status == EventStatus::InFlight => {
                event.status = EventStatus::New;
                event.claimed_at = None;
                true
            }
            _ => false,
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_available()
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_cart(&mut self, client_id: ClientId) -> Result<Option<CartId>, RepositoryError> {
        Ok(self.work.carts.get(&client_id).copied())
    }

    async fn lock_cart(&mut self, client_id: ClientId) -> Result<Option<CartId>, RepositoryError> {
        self.find_cart(client_id).await
    }

    async fn lock_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        Ok(self.work.products.get(&product_id).cloned())
    }

    async fn adjust_stock(
        &mut self,
        product_id: ProductId,
        delta: i32,
    ) -> Result<i32, RepositoryError> {
        let product = self
            .work
            .products
            .get_mut(&product_id)
            .ok_or(RepositoryError::NotFound)?;

        let quantity = product.quantity + delta;
        if quantity < 0 {
            return Err(RepositoryError::Conflict(format!(
                "stock of product {product_id} would go negative"
            )));
        }
        product.quantity = quantity;
        Ok(quantity)
    }

    async fn lock_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartLine>, RepositoryError> {
        Ok(self.work.lines.get(&(cart_id, product_id)).cloned())
    }

    async fn add_to_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
        price: Money,
    ) -> Result<i32, RepositoryError> {
        let line = self
            .work
            .lines
            .entry((cart_id, product_id))
            .and_modify(|line| line.quantity += quantity)
            .or_insert(CartLine {
                product_id,
                quantity,
                price,
            });
        Ok(line.quantity)
    }

    async fn set_line_quantity(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<(), RepositoryError> {
        let line = self
            .work
            .lines
            .get_mut(&(cart_id, product_id))
            .ok_or(RepositoryError::NotFound)?;
        line.quantity = quantity;
        Ok(())
    }

    async fn delete_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<(), RepositoryError> {
        self.work
            .lines
            .remove(&(cart_id, product_id))
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn cart_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLine>, RepositoryError> {
        Ok(self.work.lines_of(cart_id))
    }

    async fn priced_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLine>, RepositoryError> {
        self.work
            .lines_of(cart_id)
            .into_iter()
            .map(|line| {
                let product = self.work.products.get(&line.product_id).ok_or_else(|| {
                    RepositoryError::DataCorruption(format!(
                        "cart line references missing product {}",
                        line.product_id
                    ))
                })?;
                Ok(CartLine {
                    price: product.price,
                    ..line
                })
            })
            .collect()
    }

    async fn clear_lines(&mut self, cart_id: CartId) -> Result<u64, RepositoryError> {
        let before = self.work.lines.len();
        self.work.lines.retain(|(id, _), _| *id != cart_id);
        Ok(u64::try_from(before - self.work.lines.len()).unwrap_or(u64::MAX))
    }

    async fn lock_client(&mut self, client_id: ClientId) -> Result<Option<Client>, RepositoryError> {
        Ok(self.work.clients.get(&client_id).cloned())
    }

    async fn adjust_balance(
        &mut self,
        client_id: ClientId,
        delta: Money,
    ) -> Result<Money, RepositoryError> {
        let client = self
            .work
            .clients
            .get_mut(&client_id)
            .ok_or(RepositoryError::NotFound)?;

        let invoice = client.invoice + delta;
        if invoice.is_negative() {
            return Err(RepositoryError::Conflict(format!(
                "balance of client {client_id} would go negative"
            )));
        }
        client.invoice = invoice;
        Ok(invoice)
    }

    async fn append_event(&mut self, event: &NewOutboxEvent) -> Result<Uuid, RepositoryError> {
        if self.faults.fail_event_appends.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("outbox append rejected".to_owned()));
        }

        let id = Uuid::new_v4();
        self.work.events.push(OutboxEvent {
            id,
            key: event.kind.routing_key().to_owned(),
            message: event.message.clone(),
            status: EventStatus::New,
            created_at: Utc::now(),
            claimed_at: None,
        });
        Ok(id)
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        let Self {
            mut guard, work, ..
        } = self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartkeeper_core::{ClientRole, EventKind};

    use super::*;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_client(Client {
                id: ClientId::new(7),
                username: "alice".to_owned(),
                role: ClientRole::Customer,
                invoice: Money::from_cents(10_000),
            })
            .await;
        store
            .insert_product(Product {
                id: ProductId::new(42),
                name: "Espresso beans".to_owned(),
                description: "1kg".to_owned(),
                price: Money::from_cents(1000),
                quantity: 5,
            })
            .await;
        store
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = seeded().await;
        let cart_id = store.ensure_cart(ClientId::new(7)).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.adjust_stock(ProductId::new(42), -2).await.unwrap();
            tx.add_to_line(cart_id, ProductId::new(42), 2, Money::from_cents(1000))
                .await
                .unwrap();
        }

        assert_eq!(store.product(ProductId::new(42)).await.unwrap().quantity, 5);
        assert!(store.lines_of(ClientId::new(7)).await.is_empty());
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = seeded().await;
        let cart_id = store.ensure_cart(ClientId::new(7)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.adjust_stock(ProductId::new(42), -2).await.unwrap();
        tx.add_to_line(cart_id, ProductId::new(42), 2, Money::from_cents(1000))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.product(ProductId::new(42)).await.unwrap().quantity, 3);
        assert_eq!(store.reserved_units(ProductId::new(42)).await, 2);
    }

    #[tokio::test]
    async fn stock_never_goes_negative() {
        let store = seeded().await;
        let mut tx = store.begin().await.unwrap();

        let err = tx.adjust_stock(ProductId::new(42), -6).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn ensure_cart_is_idempotent_and_requires_client() {
        let store = seeded().await;
        let first = store.ensure_cart(ClientId::new(7)).await.unwrap();
        let second = store.ensure_cart(ClientId::new(7)).await.unwrap();
        assert_eq!(first, second);

        let missing = store.ensure_cart(ClientId::new(99)).await.unwrap_err();
        assert!(matches!(missing, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn claim_release_and_complete() {
        let store = seeded().await;
        let id = store
            .append_event(&NewOutboxEvent {
                kind: EventKind::ItemAdded,
                message: "{}".to_owned(),
            })
            .await
            .unwrap();

        let claimed = store.claim_next_event(Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed.map(|event| event.id), Some(id));
        // Held by the first claim until the lease runs out.
        assert!(store.claim_next_event(Duration::from_secs(30)).await.unwrap().is_none());

        assert!(store.release_event(id).await.unwrap());
        let reclaimed = store.claim_next_event(Duration::from_secs(30)).await.unwrap();
        assert_eq!(reclaimed.map(|event| event.id), Some(id));

        assert!(store.mark_event_done(id).await.unwrap());
        assert!(!store.mark_event_done(id).await.unwrap());
        assert!(store.claim_next_event(Duration::from_secs(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let store = seeded().await;
        store
            .append_event(&NewOutboxEvent {
                kind: EventKind::ItemRemoved,
                message: "{}".to_owned(),
            })
            .await
            .unwrap();

        assert!(store.claim_next_event(Duration::ZERO).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.claim_next_event(Duration::ZERO).await.unwrap().is_some());
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_transactions() {
        let store = seeded().await;
        store.set_unavailable(true);
        assert!(matches!(
            store.begin().await,
            Err(RepositoryError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
