//! In-process cache backend built on `moka`.
//!
//! Snapshots are kept in their serialized JSON form so the backend holds
//! exactly what a remote key-value cache would.

use async_trait::async_trait;
use moka::future::Cache;

use cartkeeper_core::ClientId;

use super::{CacheError, CartCache, cart_key};
use crate::models::CartLine;

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cart snapshots held.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
        }
    }
}

/// Cart snapshots in a bounded `moka` cache. Entries never expire; they
/// are only replaced or evicted for capacity.
#[derive(Clone)]
pub struct MokaCartCache {
    snapshots: Cache<String, String>,
}

impl MokaCartCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            snapshots: Cache::builder().max_capacity(config.max_capacity).build(),
        }
    }

    /// Raw serialized snapshot, as stored.
    #[cfg(test)]
    async fn raw(&self, client_id: ClientId) -> Option<String> {
        self.snapshots.get(&cart_key(client_id)).await
    }
}

impl Default for MokaCartCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl CartCache for MokaCartCache {
    async fn load(&self, client_id: ClientId) -> Result<Option<Vec<CartLine>>, CacheError> {
        match self.snapshots.get(&cart_key(client_id)).await {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, client_id: ClientId, lines: &[CartLine]) -> Result<(), CacheError> {
        let json = serde_json::to_string(lines)?;
        self.snapshots.insert(cart_key(client_id), json).await;
        Ok(())
    }

    async fn invalidate(&self, client_id: ClientId) -> Result<(), CacheError> {
        self.snapshots.invalidate(&cart_key(client_id)).await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cartkeeper_core::{Money, ProductId};

    use super::*;

    #[tokio::test]
    async fn absent_snapshot_is_a_miss() {
        let cache = MokaCartCache::default();
        assert!(cache.load(ClientId::new(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stores_serialized_snapshot_under_cart_key() {
        let cache = MokaCartCache::default();
        let lines = vec![CartLine {
            product_id: ProductId::new(42),
            quantity: 2,
            price: Money::from_cents(1000),
        }];

        cache.store(ClientId::new(7), &lines).await.unwrap();

        assert_eq!(cart_key(ClientId::new(7)), "cart:7");
        assert_eq!(
            cache.raw(ClientId::new(7)).await.as_deref(),
            Some(r#"[{"productId":42,"quantity":2,"price":"10.00"}]"#)
        );
        assert_eq!(cache.load(ClientId::new(7)).await.unwrap(), Some(lines));
    }

    #[tokio::test]
    async fn empty_snapshot_is_distinct_from_absent() {
        let cache = MokaCartCache::default();
        cache.store(ClientId::new(7), &[]).await.unwrap();
        assert_eq!(cache.load(ClientId::new(7)).await.unwrap(), Some(Vec::new()));

        cache.invalidate(ClientId::new(7)).await.unwrap();
        assert!(cache.load(ClientId::new(7)).await.unwrap().is_none());
    }
}
