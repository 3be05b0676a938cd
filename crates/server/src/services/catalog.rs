//! Client and product lookups.

use tracing::instrument;

use cartkeeper_core::ClientId;

use super::{CartError, record_event, validate_client};
use crate::db::Store;
use crate::models::{Client, Product};
use crate::outbox::CartEvent;

/// Read-only access to clients and the product catalog.
#[derive(Clone)]
pub struct Catalog<S> {
    store: S,
}

impl<S: Store> Catalog<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Fetch a client profile.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotFound` if the client does not exist.
    #[instrument(skip(self))]
    pub async fn find_client(&self, client_id: ClientId) -> Result<Client, CartError> {
        validate_client(client_id)?;

        self.store
            .find_client(client_id)
            .await?
            .ok_or(CartError::NotFound("client"))
    }

    /// Products whose name contains `name`, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` if `name` is blank.
    #[instrument(skip(self))]
    pub async fn search_products(&self, name: &str) -> Result<Vec<Product>, CartError> {
        let query = name.trim();
        if query.is_empty() {
            return Err(CartError::Validation("product name must not be empty".to_owned()));
        }

        let products = self.store.search_products(query).await?;
        tracing::debug!(query, found = products.len(), "Product search");

        let event = if products.is_empty() {
            CartEvent::ProductsNotFound {
                query: query.to_owned(),
            }
        } else {
            CartEvent::ProductsFound {
                query: query.to_owned(),
                product_ids: products.iter().map(|product| product.id).collect(),
            }
        };
        record_event(&self.store, &event).await;

        Ok(products)
    }
}
