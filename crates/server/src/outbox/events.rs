//! Domain event payloads written to the outbox.

use serde::{Deserialize, Serialize};

use cartkeeper_core::{ClientId, EventKind, Money, ProductId};

use crate::db::RepositoryError;
use crate::models::{CartLine, NewOutboxEvent};

/// Payload of an outbox row, tagged by operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CartEvent {
    ItemAdded {
        client_id: ClientId,
        product_id: ProductId,
        quantity: i32,
        unit_price: Money,
        /// Line quantity after the add.
        line_quantity: i32,
    },
    ItemAddFailed {
        client_id: ClientId,
        product_id: ProductId,
        quantity: i32,
        reason: String,
    },
    ItemRemoved {
        client_id: ClientId,
        product_id: ProductId,
        /// Line quantity after the removal; zero when the line was deleted.
        remaining_quantity: i32,
    },
    ItemRemoveFailed {
        client_id: ClientId,
        product_id: ProductId,
        reason: String,
    },
    CartRetrieved {
        client_id: ClientId,
        lines: Vec<CartLine>,
        total: Money,
    },
    CartRetrieveFailed {
        client_id: ClientId,
        reason: String,
    },
    PaymentSettled {
        client_id: ClientId,
        amount: Money,
    },
    PaymentFailed {
        client_id: ClientId,
        amount: Money,
        reason: String,
    },
    ProductsFound {
        query: String,
        product_ids: Vec<ProductId>,
    },
    ProductsNotFound {
        query: String,
    },
}

impl CartEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ItemAdded { .. } => EventKind::ItemAdded,
            Self::ItemAddFailed { .. } => EventKind::ItemAddFailed,
            Self::ItemRemoved { .. } => EventKind::ItemRemoved,
            Self::ItemRemoveFailed { .. } => EventKind::ItemRemoveFailed,
            Self::CartRetrieved { .. } => EventKind::CartRetrieved,
            Self::CartRetrieveFailed { .. } => EventKind::CartRetrieveFailed,
            Self::PaymentSettled { .. } => EventKind::PaymentSettled,
            Self::PaymentFailed { .. } => EventKind::PaymentFailed,
            Self::ProductsFound { .. } => EventKind::ProductsFound,
            Self::ProductsNotFound { .. } => EventKind::ProductsNotFound,
        }
    }

    /// Serialize into an outbox row.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::DataCorruption` if the payload cannot be encoded.
    pub fn to_outbox(&self) -> Result<NewOutboxEvent, RepositoryError> {
        let message = serde_json::to_string(self).map_err(|e| {
            RepositoryError::DataCorruption(format!("failed to encode {} event: {e}", self.kind()))
        })?;

        Ok(NewOutboxEvent {
            kind: self.kind(),
            message,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_operation_and_ids() {
        let event = CartEvent::ItemAdded {
            client_id: ClientId::new(7),
            product_id: ProductId::new(42),
            quantity: 2,
            unit_price: Money::from_cents(1000),
            line_quantity: 2,
        };

        let row = event.to_outbox().unwrap();
        assert_eq!(row.kind, EventKind::ItemAdded);

        let value: serde_json::Value = serde_json::from_str(&row.message).unwrap();
        assert_eq!(value["op"], "item_added");
        assert_eq!(value["client_id"], 7);
        assert_eq!(value["product_id"], 42);
        assert_eq!(value["unit_price"], "10.00");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let event = CartEvent::PaymentFailed {
            client_id: ClientId::new(7),
            amount: Money::from_cents(2000),
            reason: "insufficient funds".to_owned(),
        };
        let row = event.to_outbox().unwrap();
        let decoded: CartEvent = serde_json::from_str(&row.message).unwrap();
        assert_eq!(decoded, event);
    }
}
