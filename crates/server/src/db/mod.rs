//! Store-of-record gateway.
//!
//! # Database
//!
//! The relational store is the sole source of truth for carts and stock:
//!
//! ## Tables
//!
//! - `clients` - Client accounts and balances (`invoice`)
//! - `products` - Catalog with available stock (`quantity >= 0`)
//! - `carts` - One cart per client (`user_id` unique)
//! - `cart_items` - Cart lines, unique on `(cart_id, product_id)`
//! - `events` - Transactional outbox
//!
//! # Transactions
//!
//! Every mutation runs inside a [`StoreTx`] obtained from [`Store::begin`].
//! A transaction is committed only by an explicit [`StoreTx::commit`];
//! dropping it on any early return (an `Err` bubbled with `?`, a panic, a
//! cancelled future) rolls back every statement issued through it.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p cartkeeper-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use uuid::Uuid;

use cartkeeper_core::{CartId, ClientId, Money, ProductId};

use crate::models::{CartLine, Client, NewOutboxEvent, OutboxEvent, Product};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// A referenced row does not exist.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., stock would go negative).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Access to the store of record.
///
/// Implementations are cheap to clone and share one underlying pool.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    /// Transaction handle produced by [`Store::begin`].
    type Tx: StoreTx;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx, RepositoryError>;

    /// Resolve the client's cart, creating it if absent.
    ///
    /// Returns `RepositoryError::NotFound` if the client does not exist.
    async fn ensure_cart(&self, client_id: ClientId) -> Result<CartId, RepositoryError>;

    async fn find_client(&self, client_id: ClientId) -> Result<Option<Client>, RepositoryError>;

    /// Case-insensitive substring search on product names.
    async fn search_products(&self, name: &str) -> Result<Vec<Product>, RepositoryError>;

    /// Claim the oldest deliverable outbox row.
    ///
    /// Picks a `new` row, or an `in_flight` row whose claim is older than
    /// `lease`, and flips it to `in_flight` in one conditional update so two
    /// pollers never hold the same row.
    async fn claim_next_event(
        &self,
        lease: Duration,
    ) -> Result<Option<OutboxEvent>, RepositoryError>;

    /// Mark a claimed row delivered. Returns `false` if it was not in flight.
    async fn mark_event_done(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Hand a claimed row back to `new` after a failed publish.
    async fn release_event(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), RepositoryError>;

    /// Append an outbox row in its own transaction.
    ///
    /// Used for events that describe reads or rejected mutations, where there
    /// is no business transaction to join.
    async fn append_event(&self, event: &NewOutboxEvent) -> Result<Uuid, RepositoryError> {
        let mut tx = self.begin().await?;
        let id = tx.append_event(event).await?;
        tx.commit().await?;
        Ok(id)
    }
}

/// Statements executed inside one store transaction.
///
/// `lock_*` reads take a row lock (`SELECT ... FOR UPDATE`) held until the
/// transaction ends, which linearizes concurrent mutations of the same row.
#[async_trait]
pub trait StoreTx: Send + Sized {
    async fn find_cart(&mut self, client_id: ClientId) -> Result<Option<CartId>, RepositoryError>;

    /// Resolve and lock the client's cart row.
    ///
    /// Every mutation of a cart's lines takes this lock first, so a checkout
    /// never clears lines it did not price.
    async fn lock_cart(&mut self, client_id: ClientId) -> Result<Option<CartId>, RepositoryError>;

    async fn lock_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Option<Product>, RepositoryError>;

    /// Add `delta` (possibly negative) to a product's stock.
    ///
    /// Fails with `RepositoryError::Conflict` if stock would become negative.
    async fn adjust_stock(
        &mut self,
        product_id: ProductId,
        delta: i32,
    ) -> Result<i32, RepositoryError>;

    async fn lock_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartLine>, RepositoryError>;

    /// Increment an existing line, or insert it at `price`.
    ///
    /// Returns the resulting line quantity.
    async fn add_to_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
        price: Money,
    ) -> Result<i32, RepositoryError>;

    async fn set_line_quantity(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<(), RepositoryError>;

    async fn delete_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<(), RepositoryError>;

    /// Cart lines with their snapshot prices, ordered by product.
    async fn cart_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLine>, RepositoryError>;

    /// Cart lines joined with the products' current prices.
    async fn priced_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLine>, RepositoryError>;

    /// Delete every line of a cart. Returns the number of lines removed.
    async fn clear_lines(&mut self, cart_id: CartId) -> Result<u64, RepositoryError>;

    async fn lock_client(&mut self, client_id: ClientId) -> Result<Option<Client>, RepositoryError>;

    /// Add `delta` (possibly negative) to a client's balance.
    async fn adjust_balance(
        &mut self,
        client_id: ClientId,
        delta: Money,
    ) -> Result<Money, RepositoryError>;

    /// Append a `new` outbox row. It becomes visible only on commit.
    async fn append_event(&mut self, event: &NewOutboxEvent) -> Result<Uuid, RepositoryError>;

    async fn commit(self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
