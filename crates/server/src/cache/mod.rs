//! Cache mirror for cart snapshots.
//!
//! A snapshot is the ordered list of a cart's lines stored under
//! `cart:{clientId}` with no expiry. The mirror has no authority: absence is
//! an expected state, and every error here is reported to the caller as a
//! [`CacheError`] which the engine logs and treats as a miss.
//!
//! Snapshots never expire, so a snapshot that could not be brought up to
//! date after a commit is invalidated instead of being left behind.

pub mod local;

use async_trait::async_trait;
use thiserror::Error;

use cartkeeper_core::ClientId;

use crate::models::CartLine;

pub use local::{CacheConfig, MokaCartCache};

/// Errors raised by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Snapshot could not be encoded or decoded.
    #[error("snapshot codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Backend unreachable or refused the operation.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Keyed store of cart snapshots.
#[async_trait]
pub trait CartCache: Send + Sync + 'static {
    /// Read a client's snapshot. `Ok(None)` is a plain miss.
    async fn load(&self, client_id: ClientId) -> Result<Option<Vec<CartLine>>, CacheError>;

    /// Overwrite a client's snapshot.
    async fn store(&self, client_id: ClientId, lines: &[CartLine]) -> Result<(), CacheError>;

    /// Drop a client's snapshot. Dropping an absent snapshot is not an error.
    async fn invalidate(&self, client_id: ClientId) -> Result<(), CacheError>;
}

/// Cache key of a client's snapshot.
#[must_use]
pub fn cart_key(client_id: ClientId) -> String {
    format!("cart:{client_id}")
}
