//! Cart and checkout handlers.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use cartkeeper_core::{ClientId, ProductId};

use crate::cache::CartCache;
use crate::db::Store;
use crate::error::Result;
use crate::models::{CartLine, CartView};
use crate::services::PaymentReceipt;
use crate::state::AppState;

use super::extract::{ApiJson, ApiPath};

/// Body of `POST /carts/{client_id}/items`.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    #[serde(alias = "productId")]
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Result of a single-unit removal.
#[derive(Debug, Serialize)]
pub struct RemoveItemResponse {
    pub product_id: ProductId,
    /// Units left on the line; zero when the line was deleted.
    pub remaining_quantity: i32,
}

/// `GET /carts/{client_id}`
pub async fn get_cart<S: Store, C: CartCache>(
    State(state): State<AppState<S, C>>,
    ApiPath(client_id): ApiPath<i32>,
) -> Result<Json<CartView>> {
    let cart = state.carts().get_cart(ClientId::new(client_id)).await?;
    Ok(Json(cart))
}

/// `POST /carts/{client_id}/items`
pub async fn add_item<S: Store, C: CartCache>(
    State(state): State<AppState<S, C>>,
    ApiPath(client_id): ApiPath<i32>,
    ApiJson(body): ApiJson<AddItemRequest>,
) -> Result<Json<CartLine>> {
    let line = state
        .carts()
        .add_item(ClientId::new(client_id), body.product_id, body.quantity)
        .await?;
    Ok(Json(line))
}

/// `DELETE /carts/{client_id}/items/{product_id}`
pub async fn remove_item<S: Store, C: CartCache>(
    State(state): State<AppState<S, C>>,
    ApiPath((client_id, product_id)): ApiPath<(i32, i32)>,
) -> Result<Json<RemoveItemResponse>> {
    let product_id = ProductId::new(product_id);
    let remaining_quantity = state
        .carts()
        .remove_item(ClientId::new(client_id), product_id)
        .await?;

    Ok(Json(RemoveItemResponse {
        product_id,
        remaining_quantity,
    }))
}

/// `POST /carts/{client_id}/pay`
pub async fn pay<S: Store, C: CartCache>(
    State(state): State<AppState<S, C>>,
    ApiPath(client_id): ApiPath<i32>,
) -> Result<Json<PaymentReceipt>> {
    let receipt = state.checkout().pay(ClientId::new(client_id)).await?;
    Ok(Json(receipt))
}
