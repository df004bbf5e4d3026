//! Error bridging between the engine and HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flashsale_core::SaleError;

/// HTTP-facing error: a status code and a plain-text message.
///
/// Implements Axum's `IntoResponse` so handlers can return
/// `Result<T, ApiError>` and rely on the mapping from engine errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Create an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// The mapped status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)
    }
}

impl From<SaleError> for ApiError {
    fn from(err: SaleError) -> Self {
        let status = match err {
            SaleError::InvalidItemId => StatusCode::BAD_REQUEST,
            SaleError::ItemAlreadyReserved
            | SaleError::ItemAlreadySold
            | SaleError::AllItemsPurchased
            | SaleError::UserLimitExceeded
            | SaleError::ReservationNotFound
            | SaleError::ReservationExpired
            | SaleError::ReservationAlreadyCompleted
            | SaleError::PurchaseNotAllowed => StatusCode::CONFLICT,
            SaleError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            SaleError::Durable(_) | SaleError::InvalidConfig(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, message = %self.message, "request failed");
        }
        (self.status, self.message).into_response()
    }
}
