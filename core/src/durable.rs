//! Durable writer boundary.
//!
//! The engine persists reservation and purchase facts through this trait
//! and recovers from them on startup. Implementations own their batching
//! and flush timing; the engine only assumes bounded acknowledgement
//! latency, which it enforces with the configured ack timeout. Value copies
//! cross the boundary; no shared mutability does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DurableError;
use crate::reservation::Reservation;

/// A reservation fact as persisted and recovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    /// The opaque reservation code.
    pub code: Uuid,
    /// The reserving user.
    pub user_id: i64,
    /// Index of the reserved item.
    pub item_index: i64,
    /// Creation time, UTC.
    pub created_at: DateTime<Utc>,
    /// Expiry time, UTC.
    pub expires_at: DateTime<Utc>,
}

impl From<&Reservation> for ReservationRecord {
    fn from(reservation: &Reservation) -> Self {
        Self {
            code: reservation.code(),
            user_id: reservation.user_id(),
            item_index: reservation.item_index(),
            created_at: reservation.created_at(),
            expires_at: reservation.expires_at(),
        }
    }
}

/// A confirmed purchase fact as recovered for one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseFact {
    /// Index of the purchased item.
    pub item_index: i64,
    /// The buying user.
    pub user_id: i64,
}

/// Append-only persistence for sale facts, with recovery reads.
///
/// `append_*` calls return once the fact is durably acknowledged; the
/// engine awaits that acknowledgement before responding to the caller and
/// rolls back its in-memory state when the append fails.
#[async_trait]
pub trait DurableWriter: Send + Sync {
    /// Ensure the per-window item rows exist. Idempotent; called once per
    /// window before recovery.
    async fn provision_window(
        &self,
        window_id: i64,
        window_start: DateTime<Utc>,
        item_count: i64,
    ) -> Result<(), DurableError>;

    /// Append a reservation fact and await its acknowledgement.
    async fn append_reservation(&self, record: ReservationRecord) -> Result<(), DurableError>;

    /// Append a purchase fact and await its acknowledgement. The write is
    /// conditional on the item not already being purchased; a conflict
    /// means a race or inconsistency and must fail the append.
    async fn append_purchase(
        &self,
        window_id: i64,
        item_index: i64,
        user_id: i64,
    ) -> Result<(), DurableError>;

    /// All persisted reservations whose expiry is after `now`.
    async fn active_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationRecord>, DurableError>;

    /// Every confirmed purchase in the window.
    async fn window_purchases(&self, window_id: i64) -> Result<Vec<PurchaseFact>, DurableError>;

    /// Delete persisted reservations whose expiry is at or before `now`.
    /// Returns the number of rows removed. Called once after recovery;
    /// the rows are dead weight for every later recovery read.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DurableError>;
}
