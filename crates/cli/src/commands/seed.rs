//! Seed the database with clients and products.
//!
//! Rows are upserted by id, so seeding is repeatable. Serial sequences are
//! advanced past the seeded ids afterwards.

use std::path::Path;

use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

use cartkeeper::db;
use cartkeeper_core::{ClientId, ClientRole, Money, ProductId};

/// Bundled demo data.
const DEMO_DATA: &str = include_str!("../../seed.yaml");

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    clients: Vec<SeedClient>,
    #[serde(default)]
    products: Vec<SeedProduct>,
}

#[derive(Debug, Deserialize)]
struct SeedClient {
    id: ClientId,
    username: String,
    role: ClientRole,
    invoice: Money,
}

#[derive(Debug, Deserialize)]
struct SeedProduct {
    id: ProductId,
    name: String,
    #[serde(default)]
    description: String,
    price: Money,
    quantity: i32,
}

/// Seed from `file`, or from the bundled demo data.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or a database
/// operation fails.
pub async fn run(file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let content = match file {
        Some(path) => {
            info!(path = %path.display(), "Loading seed data from file");
            tokio::fs::read_to_string(path).await?
        }
        None => DEMO_DATA.to_owned(),
    };
    let seed: SeedFile = serde_yaml::from_str(&content)?;
    validate(&seed)?;

    let database_url = super::database_url()?;
    let pool = db::create_pool(&database_url).await?;
    info!("Connected to database");

    let mut tx = pool.begin().await?;

    for client in &seed.clients {
        sqlx::query(
            r"
            INSERT INTO clients (id, username, role, invoice)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username, role = EXCLUDED.role, invoice = EXCLUDED.invoice
            ",
        )
        .bind(client.id)
        .bind(&client.username)
        .bind(client.role.as_str())
        .bind(client.invoice)
        .execute(&mut *tx)
        .await?;
    }

    for product in &seed.products {
        sqlx::query(
            r"
            INSERT INTO products (id, name, description, price, quantity)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, description = EXCLUDED.description,
                price = EXCLUDED.price, quantity = EXCLUDED.quantity
            ",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.quantity)
        .execute(&mut *tx)
        .await?;
    }

    for table in ["clients", "products"] {
        sqlx::query(&format!(
            "SELECT setval(pg_get_serial_sequence('{table}', 'id'), COALESCE(MAX(id), 1)) FROM {table}"
        ))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        clients = seed.clients.len(),
        products = seed.products.len(),
        "Seeding complete!"
    );
    Ok(())
}

fn validate(seed: &SeedFile) -> Result<(), String> {
    for client in &seed.clients {
        if !client.id.is_valid() || client.invoice.is_negative() {
            return Err(format!("invalid client {}: id must be positive and balance non-negative", client.id));
        }
    }
    for product in &seed.products {
        if !product.id.is_valid() || product.quantity < 0 || product.price.is_negative() {
            return Err(format!(
                "invalid product {}: id, price and stock must be non-negative",
                product.id
            ));
        }
    }
    Ok(())
}
