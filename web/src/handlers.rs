//! Request handlers for the sale endpoints.
//!
//! Engine calls are spawned onto the runtime rather than awaited inline:
//! a client that disconnects mid-request drops the handler future, and the
//! two-phase protocol must still run to completion rather than stop with
//! partial effects. An abandoned reservation then simply expires through
//! the sweeper.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for `POST /reserve`.
#[derive(Debug, Deserialize)]
pub struct ReserveParams {
    /// The reserving user.
    pub user_id: i64,
    /// The item to reserve, `0 ≤ item_id < N`.
    pub item_id: i64,
}

/// Query parameters for `POST /purchase`.
#[derive(Debug, Deserialize)]
pub struct PurchaseParams {
    /// The reservation code returned by `reserve`.
    pub code: String,
}

/// `POST /reserve`: reserve an item, returning the code as plain text.
pub async fn reserve(
    State(state): State<AppState>,
    Query(params): Query<ReserveParams>,
) -> Result<String, ApiError> {
    let engine = state.manager.current_engine();
    let code = tokio::spawn(async move { engine.reserve(params.user_id, params.item_id).await })
        .await
        .map_err(|_| ApiError::internal("reservation task failed"))??;
    Ok(code.to_string())
}

/// `POST /purchase`: confirm a reservation into a purchase.
pub async fn purchase(
    State(state): State<AppState>,
    Query(params): Query<PurchaseParams>,
) -> Result<StatusCode, ApiError> {
    let code = Uuid::parse_str(&params.code)
        .map_err(|_| ApiError::bad_request("code must be a UUID"))?;
    let engine = state.manager.current_engine();
    tokio::spawn(async move { engine.purchase(code).await })
        .await
        .map_err(|_| ApiError::internal("purchase task failed"))??;
    Ok(StatusCode::OK)
}

/// `GET /health`: liveness.
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /ready`: reports whether the current generation accepts
/// requests.
pub async fn ready(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    if state.manager.current_engine().is_accepting() {
        Ok("OK")
    } else {
        Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "generation is draining",
        ))
    }
}
