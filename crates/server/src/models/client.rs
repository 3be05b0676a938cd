//! Client account domain type.

use serde::Serialize;

use cartkeeper_core::{ClientId, ClientRole, Money};

/// A client account. Created externally; only the balance is mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
    pub id: ClientId,
    pub username: String,
    pub role: ClientRole,
    /// Monetary balance debited at checkout.
    pub invoice: Money,
}
