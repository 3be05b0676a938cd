//! Status enums and routing keys.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a stored status or key does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

/// Delivery status of an outbox row.
///
/// `New -> InFlight -> Done`, with `InFlight -> New` when a publish fails.
/// `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "outbox_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    New,
    InFlight,
    Done,
}

impl EventStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InFlight => "in_flight",
            Self::Done => "done",
        }
    }

    /// Whether the poller may still pick this row up.
    #[must_use]
    pub const fn is_deliverable(&self) -> bool {
        !matches!(self, Self::Done)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "in_flight" => Ok(Self::InFlight),
            "done" => Ok(Self::Done),
            _ => Err(ParseStatusError::new("event status", s)),
        }
    }
}

/// Kind of domain event, used as the routing key on the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ItemAdded,
    ItemAddFailed,
    ItemRemoved,
    ItemRemoveFailed,
    CartRetrieved,
    CartRetrieveFailed,
    PaymentSettled,
    PaymentFailed,
    ProductsFound,
    ProductsNotFound,
}

impl EventKind {
    /// Routing key carried by every message of this kind.
    #[must_use]
    pub const fn routing_key(&self) -> &'static str {
        match self {
            Self::ItemAdded => "item-added",
            Self::ItemAddFailed => "item-add-failed",
            Self::ItemRemoved => "item-removed",
            Self::ItemRemoveFailed => "item-remove-failed",
            Self::CartRetrieved => "cart-retrieved",
            Self::CartRetrieveFailed => "cart-retrieve-failed",
            Self::PaymentSettled => "payment-settled",
            Self::PaymentFailed => "payment-failed",
            Self::ProductsFound => "products-found",
            Self::ProductsNotFound => "products-not-found",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item-added" => Ok(Self::ItemAdded),
            "item-add-failed" => Ok(Self::ItemAddFailed),
            "item-removed" => Ok(Self::ItemRemoved),
            "item-remove-failed" => Ok(Self::ItemRemoveFailed),
            "cart-retrieved" => Ok(Self::CartRetrieved),
            "cart-retrieve-failed" => Ok(Self::CartRetrieveFailed),
            "payment-settled" => Ok(Self::PaymentSettled),
            "payment-failed" => Ok(Self::PaymentFailed),
            "products-found" => Ok(Self::ProductsFound),
            "products-not-found" => Ok(Self::ProductsNotFound),
            _ => Err(ParseStatusError::new("event kind", s)),
        }
    }
}

/// Role attached to a client account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Regular shopper.
    Customer,
    /// Receives settlement credits.
    Merchant,
    Admin,
}

impl ClientRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Merchant => "merchant",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClientRole {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" | "user" => Ok(Self::Customer),
            "merchant" => Ok(Self::Merchant),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseStatusError::new("client role", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_status_round_trips_through_text() {
        for status in [EventStatus::New, EventStatus::InFlight, EventStatus::Done] {
            assert_eq!(status.as_str().parse::<EventStatus>(), Ok(status));
        }
        assert!("pending".parse::<EventStatus>().is_err());
    }

    #[test]
    fn done_is_terminal() {
        assert!(EventStatus::New.is_deliverable());
        assert!(EventStatus::InFlight.is_deliverable());
        assert!(!EventStatus::Done.is_deliverable());
    }

    #[test]
    fn routing_keys_match_serde_names() {
        let json = serde_json::to_string(&EventKind::PaymentSettled).unwrap_or_default();
        assert_eq!(json, "\"payment-settled\"");
        assert_eq!("item-removed".parse::<EventKind>(), Ok(EventKind::ItemRemoved));

        let json = serde_json::to_string(&EventKind::CartRetrieveFailed).unwrap_or_default();
        assert_eq!(json, "\"cart-retrieve-failed\"");
        assert_eq!(
            "item-remove-failed".parse::<EventKind>(),
            Ok(EventKind::ItemRemoveFailed)
        );
    }

    #[test]
    fn legacy_user_role_maps_to_customer() {
        assert_eq!("user".parse::<ClientRole>(), Ok(ClientRole::Customer));
        assert!("root".parse::<ClientRole>().is_err());
    }
}
