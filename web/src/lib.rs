//! Axum HTTP layer for the flash-sale service.
//!
//! Two POST endpoints drive the engine, both taking query parameters and
//! returning plain-text bodies:
//!
//! - `POST /reserve?user_id=&item_id=` → `200` with the reservation code
//! - `POST /purchase?code=` → `200` with an empty body
//!
//! Engine failures map onto the HTTP status classes: `400` for malformed
//! or out-of-range input, `409` for contention and quota conflicts, `500`
//! for durable-write failures (after the engine rolled back), and `503`
//! while the current generation drains. `GET /health` and `GET /ready`
//! report liveness and readiness.
//!
//! Handlers resolve the engine through the generation manager on every
//! request, so a window rotation is picked up without any handler state.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
