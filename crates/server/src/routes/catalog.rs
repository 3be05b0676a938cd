//! Client and product lookup handlers.

use axum::{Json, extract::State};
use serde::Deserialize;

use cartkeeper_core::ClientId;

use crate::cache::CartCache;
use crate::db::Store;
use crate::error::Result;
use crate::models::{Client, Product};
use crate::state::AppState;

use super::extract::{ApiPath, ApiQuery};

/// Query parameters for product search.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub name: String,
}

/// `GET /clients/{client_id}`
pub async fn find_client<S: Store, C: CartCache>(
    State(state): State<AppState<S, C>>,
    ApiPath(client_id): ApiPath<i32>,
) -> Result<Json<Client>> {
    let client = state.catalog().find_client(ClientId::new(client_id)).await?;
    Ok(Json(client))
}

/// `GET /products?name=...`
pub async fn search_products<S: Store, C: CartCache>(
    State(state): State<AppState<S, C>>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<Vec<Product>>> {
    let products = state.catalog().search_products(&query.name).await?;
    Ok(Json(products))
}
