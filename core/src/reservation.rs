//! Reservation table.
//!
//! Stores reservation records keyed by their opaque code. A reader-writer
//! guard protects the map shape only; each record's lifecycle state is a
//! CAS-driven atomic that transitions independently of the structural lock.
//! The structural lock is never held across calls into the item registry or
//! the durable writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Lifecycle state of a reservation record.
///
/// ```text
/// Active ──▶ Purchased ──▶ (removed)     confirm
///   │  ▲         │
///   │  └─────────┘                       purchase rollback
///   └──▶ Cancelled ──▶ (removed)         expiry / explicit cancel
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReservationState {
    /// The reservation holds its item and can still be purchased.
    Active = 0,
    /// The purchase is committing (or committed, pending removal).
    Purchased = 1,
    /// The reservation was cancelled by expiry or explicit cancel.
    Cancelled = 2,
}

impl ReservationState {
    fn from_word(word: u32) -> Self {
        match word {
            1 => Self::Purchased,
            2 => Self::Cancelled,
            _ => Self::Active,
        }
    }

    /// Whether the record has reached a disposition that permits removal
    /// and retention-based garbage collection: a confirmed purchase or a
    /// cancellation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Purchased | Self::Cancelled)
    }
}

/// A single reservation: a time-limited, code-identified claim by one user
/// on one item.
#[derive(Debug)]
pub struct Reservation {
    code: Uuid,
    user_id: i64,
    item_index: i64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: AtomicU32,
}

impl Reservation {
    /// Build a fresh `Active` reservation.
    #[must_use]
    pub fn new(
        code: Uuid,
        user_id: i64,
        item_index: i64,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            code,
            user_id,
            item_index,
            created_at,
            expires_at,
            state: AtomicU32::new(ReservationState::Active as u32),
        }
    }

    /// The reservation code.
    #[must_use]
    pub const fn code(&self) -> Uuid {
        self.code
    }

    /// The reserving user.
    #[must_use]
    pub const fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Index of the reserved item.
    #[must_use]
    pub const fn item_index(&self) -> i64 {
        self.item_index
    }

    /// When the reservation was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the reservation stops being purchasable.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ReservationState {
        ReservationState::from_word(self.state.load(Ordering::Acquire))
    }

    /// Atomically move `from → to`; returns whether this call won.
    pub fn transition(&self, from: ReservationState, to: ReservationState) -> bool {
        self.state
            .compare_exchange(
                from as u32,
                to as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether the hold window has elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The two disjoint code sets one sweep acts on.
#[derive(Debug, Default)]
pub struct Sweepable {
    /// Active reservations past their deadline.
    pub expired: Vec<Uuid>,
    /// Terminal records older than the retention threshold.
    pub stale: Vec<Uuid>,
}

/// Map from reservation code to record, with structural protection.
#[derive(Debug, Default)]
pub struct ReservationTable {
    inner: RwLock<HashMap<Uuid, Arc<Reservation>>>,
}

impl ReservationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record. The caller already holds a successful registry
    /// reservation for the record's item.
    pub fn insert(&self, record: Arc<Reservation>) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(record.code(), record);
    }

    /// Snapshot lookup by code.
    #[must_use]
    pub fn lookup(&self, code: &Uuid) -> Option<Arc<Reservation>> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(code).cloned()
    }

    /// CAS the record's state `from → to`. Returns `false` when the record
    /// is missing or another transition won.
    pub fn transition(&self, code: &Uuid, from: ReservationState, to: ReservationState) -> bool {
        self.lookup(code)
            .is_some_and(|record| record.transition(from, to))
    }

    /// Remove a record, permitted only in a terminal disposition:
    /// `Purchased` after confirmation or `Cancelled`. Returns whether a
    /// record was removed.
    pub fn remove(&self, code: &Uuid) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match map.get(code) {
            Some(record) if record.state().is_terminal() => {
                map.remove(code);
                true
            }
            _ => false,
        }
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.len()
    }

    /// Whether the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records currently `Active`.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .filter(|r| r.state() == ReservationState::Active)
            .count()
    }

    /// Collect the sweep sets under a single read guard: expired actives,
    /// and terminal records created before `now - retention`. The guard is
    /// released before any cancellation runs.
    #[must_use]
    pub fn collect_sweepable(&self, now: DateTime<Utc>, retention: Duration) -> Sweepable {
        let threshold = now - retention;
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut sweep = Sweepable::default();
        for (code, record) in map.iter() {
            match record.state() {
                ReservationState::Active if record.is_expired(now) => {
                    sweep.expired.push(*code);
                }
                state if state.is_terminal() && record.created_at() < threshold => {
                    sweep.stale.push(*code);
                }
                _ => {}
            }
        }
        sweep
    }
}
