//! Error types for the reservation and purchase engine.
//!
//! Every failure the engine can report is a distinct variant of
//! [`SaleError`]; the HTTP layer maps variants to status codes. The durable
//! writer boundary has its own [`DurableError`] so adapters stay decoupled
//! from engine semantics.

use thiserror::Error;

/// Errors crossing the durable writer boundary.
///
/// Adapters translate their storage-specific failures into these variants;
/// the engine treats them all as recoverable and rolls back the in-memory
/// side of the affected operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurableError {
    /// The store could not be reached or rejected the connection.
    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    /// The acknowledgement did not arrive within the configured timeout.
    #[error("durable acknowledgement timed out")]
    Timeout,

    /// The store refused the write (e.g. a conditional update matched no
    /// rows, signalling a race or inconsistency).
    #[error("durable store rejected the write: {0}")]
    Conflict(String),

    /// The writer has shut down and accepts no further submissions.
    #[error("durable writer is closed")]
    Closed,
}

/// Errors returned by engine operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SaleError {
    /// The item id is outside `[0, N)` for this window.
    #[error("invalid item id")]
    InvalidItemId,

    /// Another reservation currently holds the item.
    #[error("item already reserved")]
    ItemAlreadyReserved,

    /// The item has already been sold in this window.
    #[error("item already sold")]
    ItemAlreadySold,

    /// Every item in the window has a confirmed purchase.
    #[error("all items already purchased")]
    AllItemsPurchased,

    /// The user reached the per-window purchase cap.
    #[error("user purchase limit reached")]
    UserLimitExceeded,

    /// No reservation exists for the presented code.
    #[error("reservation not found")]
    ReservationNotFound,

    /// The reservation's hold window elapsed before purchase.
    #[error("reservation expired")]
    ReservationExpired,

    /// The reservation has already been confirmed or is mid-commit.
    #[error("reservation already completed")]
    ReservationAlreadyCompleted,

    /// The purchase cannot proceed (cancelled reservation or an
    /// inconsistency detected on the purchase path).
    #[error("purchase not allowed")]
    PurchaseNotAllowed,

    /// The current generation is draining; retry against the next one.
    #[error("generation is draining")]
    Draining,

    /// Engine construction or recovery was handed an invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A durable write failed after the in-memory state was rolled back.
    #[error("durable write failed")]
    Durable(#[from] DurableError),
}

impl SaleError {
    /// Whether a client retry against the same generation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ItemAlreadyReserved | Self::Draining | Self::Durable(_)
        )
    }
}
