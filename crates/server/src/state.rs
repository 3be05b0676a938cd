//! Application state shared across handlers.

use std::sync::Arc;

use cartkeeper_core::ClientId;

use crate::cache::CartCache;
use crate::db::Store;
use crate::services::{CartEngine, Catalog, Checkout};

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`; owns the services wired to one store and
/// one cache.
pub struct AppState<S, C> {
    inner: Arc<AppStateInner<S, C>>,
}

struct AppStateInner<S, C> {
    store: S,
    carts: CartEngine<S, C>,
    checkout: Checkout<S, C>,
    catalog: Catalog<S>,
}

impl<S, C> Clone for AppState<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store, C: CartCache> AppState<S, C> {
    /// Wire the services to a store and cache.
    ///
    /// # Arguments
    ///
    /// * `store` - Store-of-record gateway
    /// * `cache` - Cart snapshot cache
    /// * `settlement_account` - Client credited by payments
    pub fn new(store: S, cache: Arc<C>, settlement_account: ClientId) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                carts: CartEngine::new(store.clone(), Arc::clone(&cache)),
                checkout: Checkout::new(store.clone(), cache, settlement_account),
                catalog: Catalog::new(store.clone()),
                store,
            }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    #[must_use]
    pub fn carts(&self) -> &CartEngine<S, C> {
        &self.inner.carts
    }

    #[must_use]
    pub fn checkout(&self) -> &Checkout<S, C> {
        &self.inner.checkout
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog<S> {
        &self.inner.catalog
    }
}
