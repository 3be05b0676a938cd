//! `PostgreSQL` implementation of the store gateway.
//!
//! All statements are parameterized. Row locks use `SELECT ... FOR UPDATE`;
//! the outbox claim uses `FOR UPDATE SKIP LOCKED` so concurrent pollers pick
//! different rows.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use cartkeeper_core::{CartId, ClientId, ClientRole, EventStatus, Money, ProductId};

use super::{RepositoryError, Store, StoreTx};
use crate::models::{CartLine, Client, NewOutboxEvent, OutboxEvent, Product};

/// Store gateway backed by a `PgPool`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// An open `PostgreSQL` transaction. Rolls back when dropped uncommitted.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// =============================================================================
// Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ClientRow {
    id: ClientId,
    username: String,
    role: String,
    invoice: Money,
}

impl TryFrom<ClientRow> for Client {
    type Error = RepositoryError;

    fn try_from(row: ClientRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<ClientRole>().map_err(|e| {
            RepositoryError::DataCorruption(format!("client {}: {e}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            username: row.username,
            role,
            invoice: row.invoice,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: ProductId,
    name: String,
    description: String,
    price: Money,
    quantity: i32,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            quantity: row.quantity,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LineRow {
    product_id: ProductId,
    quantity: i32,
    price: Money,
}

impl From<LineRow> for CartLine {
    fn from(row: LineRow) -> Self {
        Self {
            product_id: row.product_id,
            quantity: row.quantity,
            price: row.price,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    key: String,
    message: String,
    status: EventStatus,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
}

impl From<EventRow> for OutboxEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            key: row.key,
            message: row.message,
            status: row.status,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, RepositoryError> {
        Ok(PgTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn ensure_cart(&self, client_id: ClientId) -> Result<CartId, RepositoryError> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        sqlx::query_scalar::<_, CartId>(
            r"
            INSERT INTO carts (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING cart_id
            ",
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return RepositoryError::NotFound;
            }
            RepositoryError::Database(e)
        })
    }

    async fn find_client(&self, client_id: ClientId) -> Result<Option<Client>, RepositoryError> {
        sqlx::query_as::<_, ClientRow>(
            r"
            SELECT id, username, role, invoice
            FROM clients
            WHERE id = $1
            ",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Client::try_from)
        .transpose()
    }

    async fn search_products(&self, name: &str) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, description, price, quantity
            FROM products
            WHERE name ILIKE '%' || $1 || '%'
            ORDER BY id
            ",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn claim_next_event(
        &self,
        lease: Duration,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let row = sqlx::query_as::<_, EventRow>(
            r"
            UPDATE events
            SET status = 'in_flight', claimed_at = NOW()
            WHERE id = (
                SELECT id FROM events
                WHERE status = 'new'
                   OR (status = 'in_flight' AND claimed_at < NOW() - make_interval(secs => $1))
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, key, message, status, created_at, claimed_at
            ",
        )
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OutboxEvent::from))
    }

    async fn mark_event_done(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE events
            SET status = 'done'
            WHERE id = $1 AND status = 'in_flight'
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_event(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE events
            SET status = 'new', claimed_at = NULL
            WHERE id = $1 AND status = 'in_flight'
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[async_trait]
impl StoreTx for PgTx {
    async fn find_cart(&mut self, client_id: ClientId) -> Result<Option<CartId>, RepositoryError> {
        let cart_id = sqlx::query_scalar::<_, CartId>(
            r"
            SELECT cart_id FROM carts WHERE user_id = $1
            ",
        )
        .bind(client_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(cart_id)
    }

    async fn lock_cart(&mut self, client_id: ClientId) -> Result<Option<CartId>, RepositoryError> {
        let cart_id = sqlx::query_scalar::<_, CartId>(
            r"
            SELECT cart_id FROM carts WHERE user_id = $1 FOR UPDATE
            ",
        )
        .bind(client_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(cart_id)
    }

    async fn lock_product(
        &mut self,
        product_id: ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, name, description, price, quantity
            FROM products
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(Product::from))
    }

    async fn adjust_stock(
        &mut self,
        product_id: ProductId,
        delta: i32,
    ) -> Result<i32, RepositoryError> {
        let quantity = sqlx::query_scalar::<_, i32>(
            r"
            UPDATE products
            SET quantity = quantity + $2
            WHERE id = $1 AND quantity + $2 >= 0
            RETURNING quantity
            ",
        )
        .bind(product_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;

        quantity.ok_or_else(|| {
            RepositoryError::Conflict(format!("stock of product {product_id} would go negative"))
        })
    }

    async fn lock_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartLine>, RepositoryError> {
        let row = sqlx::query_as::<_, LineRow>(
            r"
            SELECT product_id, quantity, price
            FROM cart_items
            WHERE cart_id = $1 AND product_id = $2
            FOR UPDATE
            ",
        )
        .bind(cart_id)
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(CartLine::from))
    }

    async fn add_to_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
        price: Money,
    ) -> Result<i32, RepositoryError> {
        let quantity = sqlx::query_scalar::<_, i32>(
            r"
            INSERT INTO cart_items (cart_id, product_id, quantity, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cart_id, product_id)
            DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            RETURNING quantity
            ",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .bind(price)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(quantity)
    }

    async fn set_line_quantity(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE cart_items
            SET quantity = $3
            WHERE cart_id = $1 AND product_id = $2
            ",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM cart_items
            WHERE cart_id = $1 AND product_id = $2
            ",
        )
        .bind(cart_id)
        .bind(product_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn cart_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLine>, RepositoryError> {
        let rows = sqlx::query_as::<_, LineRow>(
            r"
            SELECT product_id, quantity, price
            FROM cart_items
            WHERE cart_id = $1
            ORDER BY product_id
            ",
        )
        .bind(cart_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(CartLine::from).collect())
    }

    async fn priced_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLine>, RepositoryError> {
        let rows = sqlx::query_as::<_, LineRow>(
            r"
            SELECT ci.product_id, ci.quantity, p.price
            FROM cart_items ci
            JOIN products p ON p.id = ci.product_id
            WHERE ci.cart_id = $1
            ORDER BY ci.product_id
            ",
        )
        .bind(cart_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(CartLine::from).collect())
    }

    async fn clear_lines(&mut self, cart_id: CartId) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM cart_items WHERE cart_id = $1
            ",
        )
        .bind(cart_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn lock_client(&mut self, client_id: ClientId) -> Result<Option<Client>, RepositoryError> {
        sqlx::query_as::<_, ClientRow>(
            r"
            SELECT id, username, role, invoice
            FROM clients
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(client_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Client::try_from)
        .transpose()
    }

    async fn adjust_balance(
        &mut self,
        client_id: ClientId,
        delta: Money,
    ) -> Result<Money, RepositoryError> {
        sqlx::query_scalar::<_, Money>(
            r"
            UPDATE clients
            SET invoice = invoice + $2
            WHERE id = $1
            RETURNING invoice
            ",
        )
        .bind(client_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(RepositoryError::NotFound)
    }

    async fn append_event(&mut self, event: &NewOutboxEvent) -> Result<Uuid, RepositoryError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r"
            INSERT INTO events (id, key, message, status)
            VALUES ($1, $2, $3, 'new')
            ",
        )
        .bind(id)
        .bind(event.kind.routing_key())
        .bind(&event.message)
        .execute(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}
