//! Catalog product domain type.

use serde::Serialize;

use cartkeeper_core::{Money, ProductId};

/// A product with its available stock.
///
/// Stock only moves through a reservation (add to cart) or a release
/// (remove from cart) and never drops below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    /// Current unit price.
    pub price: Money,
    /// Units still available for reservation.
    pub quantity: i32,
}

impl Product {
    /// Whether `requested` units can be reserved right now.
    #[must_use]
    pub const fn has_stock(&self, requested: i32) -> bool {
        self.quantity >= requested
    }
}
