//! Router configuration.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{health, purchase, ready, reserve};
use crate::state::AppState;

/// Build the service router: the two sale endpoints plus health checks.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/reserve", post(reserve))
        .route("/purchase", post(purchase))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}
