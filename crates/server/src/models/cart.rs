//! Cart line items and the assembled cart view.

use serde::{Deserialize, Serialize};

use cartkeeper_core::{Money, ProductId};

/// One product line in a cart.
///
/// This is also the cache snapshot record: a snapshot is the ordered list of
/// a cart's lines serialized as `{productId, quantity, price}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    /// Always positive; a line reaching zero is deleted.
    pub quantity: i32,
    /// Unit price captured when the line was first added.
    pub price: Money,
}

impl CartLine {
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.price.times(self.quantity)
    }
}

/// Where a cart read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CartSource {
    Cache,
    Store,
}

/// A cart's lines with the computed total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total: Money,
    pub source: CartSource,
}

impl CartView {
    /// Build a view, computing the total as the sum of quantity x price.
    #[must_use]
    pub fn from_lines(lines: Vec<CartLine>, source: CartSource) -> Self {
        let total = lines.iter().map(CartLine::line_total).sum();
        Self {
            lines,
            total,
            source,
        }
    }

    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> i32 {
        self.lines
            .iter()
            .find(|line| line.product_id == product_id)
            .map_or(0, |line| line.quantity)
    }
}
