//! Domain models for the cart service.
//!
//! These are validated domain types, separate from the database row types
//! in [`crate::db`].

pub mod cart;
pub mod client;
pub mod outbox;
pub mod product;

pub use cart::{CartLine, CartSource, CartView};
pub use client::Client;
pub use outbox::{NewOutboxEvent, OutboxEvent};
pub use product::Product;
