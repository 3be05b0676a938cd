//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                               - Liveness
//! GET    /health/ready                         - Store connectivity
//!
//! # Catalog
//! GET    /clients/{client_id}                  - Client profile
//! GET    /products?name=...                    - Product search
//!
//! # Cart
//! GET    /carts/{client_id}                    - Cart lines and total
//! POST   /carts/{client_id}/items              - Add item {product_id, quantity}
//! DELETE /carts/{client_id}/items/{product_id} - Remove one unit
//! POST   /carts/{client_id}/pay                - Settle the cart
//! ```

pub mod carts;
pub mod catalog;
pub mod extract;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::cache::CartCache;
use crate::db::Store;
use crate::state::AppState;

/// Build the application router.
pub fn router<S: Store, C: CartCache>(state: AppState<S, C>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness::<S, C>))
        .merge(catalog_routes::<S, C>())
        .merge(cart_routes::<S, C>())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn catalog_routes<S: Store, C: CartCache>() -> Router<AppState<S, C>> {
    Router::new()
        .route("/clients/{client_id}", get(catalog::find_client::<S, C>))
        .route("/products", get(catalog::search_products::<S, C>))
}

fn cart_routes<S: Store, C: CartCache>() -> Router<AppState<S, C>> {
    Router::new()
        .route("/carts/{client_id}", get(carts::get_cart::<S, C>))
        .route("/carts/{client_id}/items", post(carts::add_item::<S, C>))
        .route(
            "/carts/{client_id}/items/{product_id}",
            delete(carts::remove_item::<S, C>),
        )
        .route("/carts/{client_id}/pay", post(carts::pay::<S, C>))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness<S: Store, C: CartCache>(State(state): State<AppState<S, C>>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
