//! Checkout settlement.

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use cartkeeper_core::{ClientId, Money};

use super::{CartError, record_event, validate_client, write_snapshot};
use crate::cache::CartCache;
use crate::db::{RepositoryError, Store, StoreTx};
use crate::models::CartLine;
use crate::outbox::CartEvent;

/// Outcome of a successful payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentReceipt {
    pub client_id: ClientId,
    /// Amount debited from the client.
    pub amount: Money,
    /// Client balance after the debit.
    pub balance: Money,
}

/// Settles carts against client balances.
pub struct Checkout<S, C> {
    store: S,
    cache: Arc<C>,
    /// Client credited with every payment.
    settlement_account: ClientId,
}

impl<S: Clone, C> Clone for Checkout<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: Arc::clone(&self.cache),
            settlement_account: self.settlement_account,
        }
    }
}

impl<S: Store, C: CartCache> Checkout<S, C> {
    pub const fn new(store: S, cache: Arc<C>, settlement_account: ClientId) -> Self {
        Self {
            store,
            cache,
            settlement_account,
        }
    }

    /// Charge the client for their cart at current product prices.
    ///
    /// The debit, the credit to the settlement account, the removal of every
    /// cart line and the `payment-settled` event commit together. Stock is
    /// not touched; it was reserved when items were added.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotFound` if the client has no cart or the cart is empty.
    /// Returns `CartError::InsufficientFunds` if the balance is below the total.
    #[instrument(skip(self))]
    pub async fn pay(&self, client_id: ClientId) -> Result<PaymentReceipt, CartError> {
        validate_client(client_id)?;

        let mut tx = self.store.begin().await?;

        let cart_id = tx
            .lock_cart(client_id)
            .await?
            .ok_or(CartError::NotFound("cart"))?;
        let lines = tx.priced_lines(cart_id).await?;
        if lines.is_empty() {
            return Err(CartError::NotFound("cart line"));
        }
        let amount: Money = lines.iter().map(CartLine::line_total).sum();

        let client = tx
            .lock_client(client_id)
            .await?
            .ok_or(CartError::NotFound("client"))?;

        if client.invoice < amount {
            drop(tx);
            tracing::info!(%amount, balance = %client.invoice, "Payment rejected, insufficient funds");
            record_event(
                &self.store,
                &CartEvent::PaymentFailed {
                    client_id,
                    amount,
                    reason: "insufficient funds".to_owned(),
                },
            )
            .await;
            return Err(CartError::InsufficientFunds {
                required: amount,
                available: client.invoice,
            });
        }

        let balance = tx.adjust_balance(client_id, Money::ZERO - amount).await?;

        if tx.lock_client(self.settlement_account).await?.is_none() {
            return Err(RepositoryError::DataCorruption(format!(
                "settlement account {} does not exist",
                self.settlement_account
            ))
            .into());
        }
        tx.adjust_balance(self.settlement_account, amount).await?;

        let cleared = tx.clear_lines(cart_id).await?;
        tx.append_event(&CartEvent::PaymentSettled { client_id, amount }.to_outbox()?)
            .await?;
        tx.commit().await?;

        tracing::info!(%amount, %balance, lines = cleared, "Payment settled");

        write_snapshot(self.cache.as_ref(), client_id, &[]).await;

        Ok(PaymentReceipt {
            client_id,
            amount,
            balance,
        })
    }
}
