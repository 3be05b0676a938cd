//! Integration test support for Cartkeeper.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartkeeper-integration-tests
//! ```
//!
//! Apart from `tests/postgres_store.rs`, every test runs against the
//! in-memory store of record, so no database is needed. The `PostgreSQL`
//! tests are ignored by default:
//!
//! ```bash
//! cargo test -p cartkeeper-integration-tests -- --ignored
//! ```
//!
//! # Test Doubles
//!
//! - [`RecordingPublisher`] - event channel that records deliveries and can
//!   be switched to fail
//! - [`SwitchableCache`] - moka-backed cache mirror whose reads, writes and
//!   invalidations can be switched to fail

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use cartkeeper::cache::{CacheError, CartCache, MokaCartCache};
use cartkeeper::db::MemoryStore;
use cartkeeper::models::{CartLine, Client, Product};
use cartkeeper::outbox::{EventPublisher, OutboxMessage, PublishError};
use cartkeeper::services::{CartEngine, Checkout};
use cartkeeper::state::AppState;
use cartkeeper_core::{ClientId, ClientRole, Money, ProductId};

/// The shopping client used throughout the scenarios.
pub const CLIENT: ClientId = ClientId::new(7);
/// Settlement account credited by payments.
pub const MERCHANT: ClientId = ClientId::new(1);
/// Product priced at 10.00 with 5 units of stock.
pub const PRODUCT: ProductId = ProductId::new(42);
/// Second product priced at 2.50 with 100 units of stock.
pub const OTHER_PRODUCT: ProductId = ProductId::new(43);

/// Store seeded with the scenario rows.
///
/// - client 7 with a balance of 100.00
/// - client 1 (settlement account) with a zero balance
/// - product 42 at 10.00, stock 5
/// - product 43 at 2.50, stock 100
pub async fn scenario_store() -> MemoryStore {
    let store = MemoryStore::new();

    for (id, username, role, invoice) in [
        (CLIENT, "alice", ClientRole::Customer, Money::from_cents(10_000)),
        (MERCHANT, "shop", ClientRole::Merchant, Money::ZERO),
    ] {
        store
            .insert_client(Client {
                id,
                username: username.to_owned(),
                role,
                invoice,
            })
            .await;
    }

    for (id, name, cents, quantity) in [
        (PRODUCT, "Golden Pineapple", 1000, 5),
        (OTHER_PRODUCT, "Pineapple Juice", 250, 100),
    ] {
        store
            .insert_product(Product {
                id,
                name: name.to_owned(),
                description: String::new(),
                price: Money::from_cents(cents),
                quantity,
            })
            .await;
    }

    store
}

/// Services wired to one in-memory store and one switchable cache.
pub struct Harness {
    pub store: MemoryStore,
    pub cache: Arc<SwitchableCache>,
    pub carts: CartEngine<MemoryStore, SwitchableCache>,
    pub checkout: Checkout<MemoryStore, SwitchableCache>,
}

impl Harness {
    pub async fn new() -> Self {
        let store = scenario_store().await;
        let cache = Arc::new(SwitchableCache::default());

        Self {
            carts: CartEngine::new(store.clone(), Arc::clone(&cache)),
            checkout: Checkout::new(store.clone(), Arc::clone(&cache), MERCHANT),
            store,
            cache,
        }
    }

    /// Application state over the same store and cache.
    #[must_use]
    pub fn app_state(&self) -> AppState<MemoryStore, SwitchableCache> {
        AppState::new(self.store.clone(), Arc::clone(&self.cache), MERCHANT)
    }

    /// Current stock of a product.
    pub async fn stock(&self, product_id: ProductId) -> i32 {
        self.store
            .product(product_id)
            .await
            .map_or(0, |product| product.quantity)
    }

    /// Current balance of a client.
    pub async fn balance(&self, client_id: ClientId) -> Money {
        self.store
            .client(client_id)
            .await
            .map_or(Money::ZERO, |client| client.invoice)
    }
}

/// Event channel that records every accepted message.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    delivered: Arc<Mutex<Vec<OutboxMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingPublisher {
    /// Make every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages accepted so far, in delivery order.
    #[must_use]
    pub fn delivered(&self) -> Vec<OutboxMessage> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Channel("channel offline".to_owned()));
        }
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// Moka-backed cache whose operations can be made to fail.
///
/// Writes and invalidations fail independently, so a lost snapshot write
/// can still be followed by a successful invalidation.
#[derive(Clone, Default)]
pub struct SwitchableCache {
    inner: MokaCartCache,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_invalidations: Arc<AtomicBool>,
}

impl SwitchableCache {
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_invalidations(&self, fail: bool) {
        self.fail_invalidations.store(fail, Ordering::SeqCst);
    }

    /// Drop a snapshot, simulating eviction.
    pub async fn evict(&self, client_id: ClientId) {
        let _ = self.inner.invalidate(client_id).await;
    }

    /// Read the snapshot bypassing fault injection.
    pub async fn peek(&self, client_id: ClientId) -> Option<Vec<CartLine>> {
        self.inner.load(client_id).await.ok().flatten()
    }
}

#[async_trait]
impl CartCache for SwitchableCache {
    async fn load(&self, client_id: ClientId) -> Result<Option<Vec<CartLine>>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("read refused".to_owned()));
        }
        self.inner.load(client_id).await
    }

    async fn store(&self, client_id: ClientId, lines: &[CartLine]) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("write refused".to_owned()));
        }
        self.inner.store(client_id, lines).await
    }

    async fn invalidate(&self, client_id: ClientId) -> Result<(), CacheError> {
        if self.fail_invalidations.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("invalidation refused".to_owned()));
        }
        self.inner.invalidate(client_id).await
    }
}
