//! Business operations over the store of record and the cache mirror.
//!
//! # Services
//!
//! - `cart` - Add, remove and read cart lines with stock reservation
//! - `checkout` - Settle a cart against the client's balance
//! - `catalog` - Client and product lookups
//!
//! Every mutation commits its outbox event in the same store transaction.
//! Cache writes happen after commit and never fail the operation; a write
//! that fails drops the snapshot so the next read goes to the store.

mod error;

pub mod cart;
pub mod catalog;
pub mod checkout;

pub use cart::CartEngine;
pub use catalog::Catalog;
pub use checkout::{Checkout, PaymentReceipt};
pub use error::CartError;

use cartkeeper_core::{ClientId, ProductId};

use crate::cache::CartCache;
use crate::db::Store;
use crate::models::CartLine;
use crate::outbox::CartEvent;

/// Append an event in its own transaction, logging instead of failing.
///
/// Used for reads and rejected mutations, which have no business
/// transaction to join. The caller must not hold an open transaction.
async fn record_event<S: Store>(store: &S, event: &CartEvent) {
    let result = match event.to_outbox() {
        Ok(row) => store.append_event(&row).await.map(|_| ()),
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::warn!(kind = %event.kind(), error = %e, "Failed to record event");
    }
}

/// Overwrite a client's snapshot, invalidating it if the write fails.
async fn write_snapshot<C: CartCache>(cache: &C, client_id: ClientId, lines: &[CartLine]) {
    let Err(e) = cache.store(client_id, lines).await else {
        return;
    };
    tracing::warn!(error = %e, "Failed to write cart snapshot, invalidating it");

    if let Err(e) = cache.invalidate(client_id).await {
        tracing::error!(error = %e, "Failed to invalidate cart snapshot");
    }
}

fn validate_client(client_id: ClientId) -> Result<(), CartError> {
    if client_id.is_valid() {
        Ok(())
    } else {
        Err(CartError::Validation(format!(
            "client id must be positive, got {client_id}"
        )))
    }
}

fn validate_product(product_id: ProductId) -> Result<(), CartError> {
    if product_id.is_valid() {
        Ok(())
    } else {
        Err(CartError::Validation(format!(
            "product id must be positive, got {product_id}"
        )))
    }
}
