//! Cart consistency engine.
//!
//! Writes go to the store of record first and are mirrored into the cache
//! after commit. Reads try the cache and fall back to the store, refilling
//! the snapshot on the way out.

use std::sync::Arc;

use tracing::instrument;

use cartkeeper_core::{ClientId, ProductId};

use super::{CartError, record_event, validate_client, validate_product, write_snapshot};
use crate::cache::CartCache;
use crate::db::{RepositoryError, Store, StoreTx};
use crate::models::{CartLine, CartSource, CartView};
use crate::outbox::CartEvent;

/// Add, remove and read cart lines.
pub struct CartEngine<S, C> {
    store: S,
    cache: Arc<C>,
}

impl<S: Clone, C> Clone for CartEngine<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<S: Store, C: CartCache> CartEngine<S, C> {
    pub const fn new(store: S, cache: Arc<C>) -> Self {
        Self { store, cache }
    }

    /// Reserve `quantity` units of a product into the client's cart.
    ///
    /// Creates the cart on first use. The stock decrement, the line upsert
    /// and the `item-added` event commit together or not at all.
    ///
    /// Returns the resulting cart line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for non-positive ids or quantity.
    /// Returns `CartError::NotFound` if the client or product does not exist.
    /// Returns `CartError::OutOfStock` if stock is below `quantity`.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        client_id: ClientId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartLine, CartError> {
        validate_client(client_id)?;
        validate_product(product_id)?;
        if quantity <= 0 {
            return Err(CartError::Validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }

        self.store
            .ensure_cart(client_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => CartError::NotFound("client"),
                other => CartError::Store(other),
            })?;

        let mut tx = self.store.begin().await?;

        let cart_id = tx
            .lock_cart(client_id)
            .await?
            .ok_or(CartError::NotFound("cart"))?;

        let product = tx
            .lock_product(product_id)
            .await?
            .ok_or(CartError::NotFound("product"))?;

        if !product.has_stock(quantity) {
            drop(tx);
            tracing::info!(
                requested = quantity,
                available = product.quantity,
                "Add rejected, out of stock"
            );
            record_event(
                &self.store,
                &CartEvent::ItemAddFailed {
                    client_id,
                    product_id,
                    quantity,
                    reason: "out of stock".to_owned(),
                },
            )
            .await;
            return Err(CartError::OutOfStock {
                product_id,
                requested: quantity,
                available: product.quantity,
            });
        }

        let remaining_stock = tx.adjust_stock(product_id, -quantity).await?;
        let line_quantity = tx
            .add_to_line(cart_id, product_id, quantity, product.price)
            .await?;

        let lines = tx.cart_lines(cart_id).await?;
        let line = lines
            .iter()
            .find(|line| line.product_id == product_id)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!(
                    "line for product {product_id} missing after upsert"
                ))
            })?;

        let event = CartEvent::ItemAdded {
            client_id,
            product_id,
            quantity,
            unit_price: line.price,
            line_quantity,
        };
        tx.append_event(&event.to_outbox()?).await?;
        tx.commit().await?;

        tracing::info!(quantity, line_quantity, remaining_stock, "Item added to cart");

        self.mirror_add(client_id, &line, quantity, &lines).await;

        Ok(line)
    }

    /// Take one unit of a product out of the client's cart.
    ///
    /// The line is deleted when its quantity reaches zero. One unit of stock
    /// is returned to the product. A failed removal is recorded as an
    /// `item-remove-failed` event.
    ///
    /// Returns the line quantity left (zero if the line was deleted).
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for non-positive ids.
    /// Returns `CartError::NotFound` if the client has no cart or no such line.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        client_id: ClientId,
        product_id: ProductId,
    ) -> Result<i32, CartError> {
        validate_client(client_id)?;
        validate_product(product_id)?;

        let (remaining, committed) = match self.release_unit(client_id, product_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::info!(error = %e, "Remove rejected");
                record_event(
                    &self.store,
                    &CartEvent::ItemRemoveFailed {
                        client_id,
                        product_id,
                        reason: e.to_string(),
                    },
                )
                .await;
                return Err(e);
            }
        };

        tracing::info!(remaining, "Item removed from cart");

        self.mirror_remove(client_id, product_id, &committed).await;

        Ok(remaining)
    }

    /// Decrement or delete the line and restore one unit of stock.
    ///
    /// Returns the remaining line quantity and the committed cart lines.
    async fn release_unit(
        &self,
        client_id: ClientId,
        product_id: ProductId,
    ) -> Result<(i32, Vec<CartLine>), CartError> {
        let mut tx = self.store.begin().await?;

        let cart_id = tx
            .lock_cart(client_id)
            .await?
            .ok_or(CartError::NotFound("cart"))?;
        let line = tx
            .lock_line(cart_id, product_id)
            .await?
            .ok_or(CartError::NotFound("cart line"))?;

        let remaining = line.quantity - 1;
        if remaining == 0 {
            tx.delete_line(cart_id, product_id).await?;
        } else {
            tx.set_line_quantity(cart_id, product_id, remaining).await?;
        }
        tx.adjust_stock(product_id, 1).await?;
        let lines = tx.cart_lines(cart_id).await?;

        let event = CartEvent::ItemRemoved {
            client_id,
            product_id,
            remaining_quantity: remaining,
        };
        tx.append_event(&event.to_outbox()?).await?;
        tx.commit().await?;

        Ok((remaining, lines))
    }

    /// Read the client's cart with its total.
    ///
    /// Served from the cache when a non-empty snapshot exists, otherwise
    /// from the store of record (refilling the snapshot). Records
    /// `cart-retrieved`, or `cart-retrieve-failed` when the read fails.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Validation` for a non-positive id.
    /// Returns `CartError::NotFound` if the client has no cart.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, client_id: ClientId) -> Result<CartView, CartError> {
        validate_client(client_id)?;

        match self.load_view(client_id).await {
            Ok(view) => {
                record_event(
                    &self.store,
                    &CartEvent::CartRetrieved {
                        client_id,
                        lines: view.lines.clone(),
                        total: view.total,
                    },
                )
                .await;
                Ok(view)
            }
            Err(e) => {
                record_event(
                    &self.store,
                    &CartEvent::CartRetrieveFailed {
                        client_id,
                        reason: e.to_string(),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    async fn load_view(&self, client_id: ClientId) -> Result<CartView, CartError> {
        match self.cache.load(client_id).await {
            Ok(Some(lines)) if !lines.is_empty() => {
                tracing::debug!("Cart served from cache");
                Ok(CartView::from_lines(lines, CartSource::Cache))
            }
            Ok(_) => self.read_through(client_id).await,
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, falling back to store");
                self.read_through(client_id).await
            }
        }
    }

    async fn read_through(&self, client_id: ClientId) -> Result<CartView, CartError> {
        let mut tx = self.store.begin().await?;
        let cart_id = tx
            .find_cart(client_id)
            .await?
            .ok_or(CartError::NotFound("cart"))?;
        let lines = tx.cart_lines(cart_id).await?;
        tx.commit().await?;

        write_snapshot(self.cache.as_ref(), client_id, &lines).await;

        Ok(CartView::from_lines(lines, CartSource::Store))
    }

    /// Merge a committed add into the snapshot.
    ///
    /// Without a readable snapshot the authoritative lines read in the
    /// committing transaction are cached instead.
    async fn mirror_add(
        &self,
        client_id: ClientId,
        line: &CartLine,
        added: i32,
        committed: &[CartLine],
    ) {
        let snapshot = match self.cache.load(client_id).await {
            Ok(Some(mut snapshot)) => {
                match snapshot
                    .iter_mut()
                    .find(|cached| cached.product_id == line.product_id)
                {
                    Some(cached) => cached.quantity += added,
                    None => {
                        snapshot.push(CartLine {
                            quantity: added,
                            ..line.clone()
                        });
                        snapshot.sort_by_key(|cached| cached.product_id);
                    }
                }
                snapshot
            }
            Ok(None) => committed.to_vec(),
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, rewriting snapshot");
                committed.to_vec()
            }
        };

        write_snapshot(self.cache.as_ref(), client_id, &snapshot).await;
    }

    /// Mirror a one-unit removal into the snapshot, if there is one.
    ///
    /// An unreadable snapshot is rewritten from the committed lines.
    async fn mirror_remove(
        &self,
        client_id: ClientId,
        product_id: ProductId,
        committed: &[CartLine],
    ) {
        let mut snapshot = match self.cache.load(client_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, rewriting snapshot");
                write_snapshot(self.cache.as_ref(), client_id, committed).await;
                return;
            }
        };

        for cached in &mut snapshot {
            if cached.product_id == product_id {
                cached.quantity -= 1;
            }
        }
        snapshot.retain(|cached| cached.quantity > 0);

        write_snapshot(self.cache.as_ref(), client_id, &snapshot).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use cartkeeper_core::{ClientRole, EventKind, Money};

    use super::*;
    use crate::cache::{CacheError, MokaCartCache};
    use crate::db::MemoryStore;
    use crate::models::{Client, Product};

    const CLIENT: ClientId = ClientId::new(7);
    const PRODUCT: ProductId = ProductId::new(42);

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_client(Client {
                id: CLIENT,
                username: "alice".to_owned(),
                role: ClientRole::Customer,
                invoice: Money::from_cents(100_000),
            })
            .await;
        store
            .insert_product(Product {
                id: PRODUCT,
                name: "Pineapple".to_owned(),
                description: "Fresh".to_owned(),
                price: Money::from_cents(1000),
                quantity: 5,
            })
            .await;
        store
    }

    struct BrokenCache;

    #[async_trait]
    impl CartCache for BrokenCache {
        async fn load(&self, _: ClientId) -> Result<Option<Vec<CartLine>>, CacheError> {
            Err(CacheError::Unavailable("down".to_owned()))
        }

        async fn store(&self, _: ClientId, _: &[CartLine]) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_owned()))
        }

        async fn invalidate(&self, _: ClientId) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_owned()))
        }
    }

    #[tokio::test]
    async fn add_reserves_stock_and_mirrors_cache() {
        let store = store().await;
        let cache = Arc::new(MokaCartCache::default());
        let engine = CartEngine::new(store.clone(), Arc::clone(&cache));

        let line = engine.add_item(CLIENT, PRODUCT, 2).await.unwrap();
        assert_eq!(line.quantity, 2);
        assert_eq!(line.price, Money::from_cents(1000));
        assert_eq!(store.product(PRODUCT).await.unwrap().quantity, 3);

        let cached = cache.load(CLIENT).await.unwrap().unwrap();
        assert_eq!(cached, vec![line]);

        let kinds: Vec<_> = store.events().await.iter().map(|e| e.key.clone()).collect();
        assert_eq!(kinds, vec![EventKind::ItemAdded.routing_key()]);
    }

    #[tokio::test]
    async fn repeated_add_increments_line() {
        let store = store().await;
        let engine = CartEngine::new(store.clone(), Arc::new(MokaCartCache::default()));

        engine.add_item(CLIENT, PRODUCT, 1).await.unwrap();
        let line = engine.add_item(CLIENT, PRODUCT, 2).await.unwrap();

        assert_eq!(line.quantity, 3);
        let view = engine.get_cart(CLIENT).await.unwrap();
        assert_eq!(view.quantity_of(PRODUCT), 3);
        assert_eq!(view.total.to_string(), "30.00");
    }

    #[tokio::test]
    async fn out_of_stock_leaves_store_untouched() {
        let store = store().await;
        let engine = CartEngine::new(store.clone(), Arc::new(MokaCartCache::default()));

        let err = engine.add_item(CLIENT, PRODUCT, 6).await.unwrap_err();
        assert!(matches!(
            err,
            CartError::OutOfStock {
                requested: 6,
                available: 5,
                ..
            }
        ));
        assert_eq!(store.product(PRODUCT).await.unwrap().quantity, 5);
        assert!(store.lines_of(CLIENT).await.is_empty());

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, EventKind::ItemAddFailed.routing_key());
    }

    #[tokio::test]
    async fn validation_runs_before_io() {
        let store = store().await;
        store.set_unavailable(true);
        let engine = CartEngine::new(store, Arc::new(MokaCartCache::default()));

        assert!(matches!(
            engine.add_item(CLIENT, PRODUCT, 0).await,
            Err(CartError::Validation(_))
        ));
        assert!(matches!(
            engine.remove_item(ClientId::new(0), PRODUCT).await,
            Err(CartError::Validation(_))
        ));
        assert!(matches!(
            engine.get_cart(ClientId::new(-1)).await,
            Err(CartError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_client_and_product() {
        let store = store().await;
        let engine = CartEngine::new(store, Arc::new(MokaCartCache::default()));

        assert!(matches!(
            engine.add_item(ClientId::new(99), PRODUCT, 1).await,
            Err(CartError::NotFound("client"))
        ));
        assert!(matches!(
            engine.add_item(CLIENT, ProductId::new(99), 1).await,
            Err(CartError::NotFound("product"))
        ));
    }

    #[tokio::test]
    async fn failed_event_append_rolls_back_reservation() {
        let store = store().await;
        let engine = CartEngine::new(store.clone(), Arc::new(MokaCartCache::default()));

        store.fail_event_appends(true);
        let err = engine.add_item(CLIENT, PRODUCT, 2).await.unwrap_err();
        assert!(matches!(err, CartError::Store(_)));

        assert_eq!(store.product(PRODUCT).await.unwrap().quantity, 5);
        assert!(store.lines_of(CLIENT).await.is_empty());
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn remove_decrements_then_deletes() {
        let store = store().await;
        let cache = Arc::new(MokaCartCache::default());
        let engine = CartEngine::new(store.clone(), Arc::clone(&cache));

        engine.add_item(CLIENT, PRODUCT, 2).await.unwrap();

        assert_eq!(engine.remove_item(CLIENT, PRODUCT).await.unwrap(), 1);
        assert_eq!(store.product(PRODUCT).await.unwrap().quantity, 4);
        assert_eq!(cache.load(CLIENT).await.unwrap().unwrap()[0].quantity, 1);

        assert_eq!(engine.remove_item(CLIENT, PRODUCT).await.unwrap(), 0);
        assert_eq!(store.product(PRODUCT).await.unwrap().quantity, 5);
        assert!(store.lines_of(CLIENT).await.is_empty());
        assert!(cache.load(CLIENT).await.unwrap().unwrap().is_empty());

        assert!(matches!(
            engine.remove_item(CLIENT, PRODUCT).await,
            Err(CartError::NotFound("cart line"))
        ));
    }

    #[tokio::test]
    async fn remove_without_cart_is_not_found() {
        let store = store().await;
        let engine = CartEngine::new(store.clone(), Arc::new(MokaCartCache::default()));
        assert!(matches!(
            engine.remove_item(CLIENT, PRODUCT).await,
            Err(CartError::NotFound("cart"))
        ));

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, EventKind::ItemRemoveFailed.routing_key());
    }

    #[tokio::test]
    async fn failed_remove_records_reason() {
        let store = store().await;
        let engine = CartEngine::new(store.clone(), Arc::new(MokaCartCache::default()));
        engine.add_item(CLIENT, PRODUCT, 1).await.unwrap();

        let other = ProductId::new(43);
        engine.remove_item(CLIENT, other).await.unwrap_err();

        let last = store.events().await.pop().unwrap();
        assert_eq!(last.key, EventKind::ItemRemoveFailed.routing_key());
        let payload: CartEvent = serde_json::from_str(&last.message).unwrap();
        assert_eq!(
            payload,
            CartEvent::ItemRemoveFailed {
                client_id: CLIENT,
                product_id: other,
                reason: "cart line not found".to_owned(),
            }
        );
        assert_eq!(store.product(PRODUCT).await.unwrap().quantity, 4);
    }

    #[tokio::test]
    async fn get_cart_reads_through_and_refills() {
        let store = store().await;
        let cache = Arc::new(MokaCartCache::default());
        let engine = CartEngine::new(store.clone(), Arc::clone(&cache));

        engine.add_item(CLIENT, PRODUCT, 2).await.unwrap();
        cache.invalidate(CLIENT).await.unwrap();

        let view = engine.get_cart(CLIENT).await.unwrap();
        assert_eq!(view.source, CartSource::Store);
        assert_eq!(view.total.to_string(), "20.00");

        let view = engine.get_cart(CLIENT).await.unwrap();
        assert_eq!(view.source, CartSource::Cache);
        assert_eq!(view.total.to_string(), "20.00");
    }

    #[tokio::test]
    async fn get_cart_without_cart_is_not_found() {
        let store = store().await;
        let engine = CartEngine::new(store.clone(), Arc::new(MokaCartCache::default()));
        assert!(matches!(
            engine.get_cart(CLIENT).await,
            Err(CartError::NotFound("cart"))
        ));

        let events = store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, EventKind::CartRetrieveFailed.routing_key());
    }

    #[tokio::test]
    async fn broken_cache_never_fails_the_caller() {
        let store = store().await;
        let engine = CartEngine::new(store.clone(), Arc::new(BrokenCache));

        engine.add_item(CLIENT, PRODUCT, 2).await.unwrap();
        engine.remove_item(CLIENT, PRODUCT).await.unwrap();

        let view = engine.get_cart(CLIENT).await.unwrap();
        assert_eq!(view.source, CartSource::Store);
        assert_eq!(view.quantity_of(PRODUCT), 1);
    }
}
