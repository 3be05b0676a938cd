//! Cartkeeper Core - Shared domain types.
//!
//! This crate provides the types shared by the cart service, the CLI and the
//! integration tests:
//! - `cartkeeper` - Cart consistency engine, outbox and HTTP surface
//! - `cli` - Migrations, seeding and one-shot outbox delivery
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no cache
//! clients. Database encodings are opt-in through the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, money, outbox statuses and event routing keys

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
