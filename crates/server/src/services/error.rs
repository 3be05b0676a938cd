//! Cart service error types.

use thiserror::Error;

use cartkeeper_core::{Money, ProductId};

use crate::db::RepositoryError;

/// Errors returned by the cart, checkout and catalog operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Input rejected before any I/O (empty name, non-positive id or quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// No such client, cart, product or cart line.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The product cannot cover the requested quantity.
    #[error("product {product_id} out of stock: requested {requested}, available {available}")]
    OutOfStock {
        product_id: ProductId,
        requested: i32,
        available: i32,
    },

    /// The client's balance does not cover the cart total.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    /// Store-of-record failure; the transaction was rolled back.
    #[error("store error: {0}")]
    Store(#[from] RepositoryError),
}

impl CartError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(RepositoryError::Database(_) | RepositoryError::Unavailable(_))
        )
    }
}
