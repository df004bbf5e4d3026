//! # Flashsale Testing
//!
//! Test doubles for the flash-sale service:
//!
//! - [`FixedClock`] / [`SteppingClock`]: deterministic time
//! - [`MemoryDurableWriter`]: in-memory durable store with recovery reads
//! - [`FailingDurableWriter`]: fault injection for the rollback paths
//!
//! ## Example
//!
//! ```ignore
//! use flashsale_testing::{test_clock, MemoryDurableWriter};
//!
//! #[tokio::test]
//! async fn reserve_then_purchase() {
//!     let clock = Arc::new(test_clock());
//!     let writer = Arc::new(MemoryDurableWriter::new());
//!     let engine = SaleEngine::new(SaleConfig::default(), 1, clock, writer)?;
//!     engine.set_accepting(true);
//!
//!     let code = engine.reserve(1, 0).await?;
//!     engine.purchase(code).await?;
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use flashsale_core::{DurableError, DurableWriter, PurchaseFact, ReservationRecord};

/// Clock that always returns the same time.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock pinned to `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl flashsale_core::Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Clock that starts at a fixed time and advances only when told to.
///
/// Expiry and window-rotation tests step it explicitly instead of sleeping.
#[derive(Debug)]
pub struct SteppingClock {
    time: Mutex<DateTime<Utc>>,
}

impl SteppingClock {
    /// Create a stepping clock starting at `time`.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(time),
        }
    }

    /// Move the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
        *time += step;
    }

    /// Pin the clock to `time`.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl flashsale_core::Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A stepping clock starting at 2025-01-01 00:00:00 UTC.
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
pub fn test_clock() -> SteppingClock {
    SteppingClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// In-memory durable writer.
///
/// Appends are recorded synchronously; the conditional purchase update is
/// modelled with a `(window_id, item_index)` uniqueness check so duplicate
/// purchases fail exactly like the SQL adapter's zero-row update. Recovery
/// reads serve whatever has been appended or seeded.
#[derive(Debug, Default)]
pub struct MemoryDurableWriter {
    reservations: Mutex<Vec<ReservationRecord>>,
    purchases: Mutex<Vec<(i64, PurchaseFact)>>,
    purchased_items: Mutex<HashSet<(i64, i64)>>,
    provisioned: Mutex<HashSet<i64>>,
    fail_recovery: AtomicBool,
}

impl MemoryDurableWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reservation facts appended.
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of purchase facts appended.
    #[must_use]
    pub fn purchase_count(&self) -> usize {
        self.purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Windows that have been provisioned.
    #[must_use]
    pub fn provisioned_windows(&self) -> HashSet<i64> {
        self.provisioned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Seed a confirmed purchase for recovery tests.
    pub fn seed_purchase(&self, window_id: i64, item_index: i64, user_id: i64) {
        self.purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((window_id, PurchaseFact { item_index, user_id }));
        self.purchased_items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((window_id, item_index));
    }

    /// Seed a persisted reservation for recovery tests.
    pub fn seed_reservation(&self, record: ReservationRecord) {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Make recovery reads fail while `fail` is set.
    pub fn fail_recovery(&self, fail: bool) {
        self.fail_recovery.store(fail, Ordering::Release);
    }

    fn recovery_gate(&self) -> Result<(), DurableError> {
        if self.fail_recovery.load(Ordering::Acquire) {
            return Err(DurableError::Unavailable(
                "recovery failure injected".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableWriter for MemoryDurableWriter {
    async fn provision_window(
        &self,
        window_id: i64,
        _window_start: DateTime<Utc>,
        _item_count: i64,
    ) -> Result<(), DurableError> {
        self.provisioned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(window_id);
        Ok(())
    }

    async fn append_reservation(&self, record: ReservationRecord) -> Result<(), DurableError> {
        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    async fn append_purchase(
        &self,
        window_id: i64,
        item_index: i64,
        user_id: i64,
    ) -> Result<(), DurableError> {
        let inserted = self
            .purchased_items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((window_id, item_index));
        if !inserted {
            return Err(DurableError::Conflict(format!(
                "item {item_index} already purchased in window {window_id}"
            )));
        }
        self.purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((window_id, PurchaseFact { item_index, user_id }));
        Ok(())
    }

    async fn active_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationRecord>, DurableError> {
        self.recovery_gate()?;
        Ok(self
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.expires_at > now)
            .cloned()
            .collect())
    }

    async fn window_purchases(&self, window_id: i64) -> Result<Vec<PurchaseFact>, DurableError> {
        self.recovery_gate()?;
        Ok(self
            .purchases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(w, _)| *w == window_id)
            .map(|(_, fact)| *fact)
            .collect())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DurableError> {
        let mut reservations = self
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = reservations.len();
        reservations.retain(|r| r.expires_at > now);
        Ok((before - reservations.len()) as u64)
    }
}

/// Durable writer that fails appends on demand.
///
/// Wraps a [`MemoryDurableWriter`] so successful calls still record facts;
/// flip the failure switches to exercise the engine's compensating
/// rollbacks.
#[derive(Debug, Default)]
pub struct FailingDurableWriter {
    inner: MemoryDurableWriter,
    fail_reservations: AtomicBool,
    fail_purchases: AtomicBool,
}

impl FailingDurableWriter {
    /// Create a writer with both failure switches off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reservation appends fail while `fail` is set.
    pub fn fail_reservations(&self, fail: bool) {
        self.fail_reservations.store(fail, Ordering::Release);
    }

    /// Make purchase appends fail while `fail` is set.
    pub fn fail_purchases(&self, fail: bool) {
        self.fail_purchases.store(fail, Ordering::Release);
    }

    /// The wrapped in-memory writer, for assertions.
    #[must_use]
    pub fn inner(&self) -> &MemoryDurableWriter {
        &self.inner
    }
}

#[async_trait]
impl DurableWriter for FailingDurableWriter {
    async fn provision_window(
        &self,
        window_id: i64,
        window_start: DateTime<Utc>,
        item_count: i64,
    ) -> Result<(), DurableError> {
        self.inner
            .provision_window(window_id, window_start, item_count)
            .await
    }

    async fn append_reservation(&self, record: ReservationRecord) -> Result<(), DurableError> {
        if self.fail_reservations.load(Ordering::Acquire) {
            return Err(DurableError::Unavailable(
                "reservation failure injected".to_string(),
            ));
        }
        self.inner.append_reservation(record).await
    }

    async fn append_purchase(
        &self,
        window_id: i64,
        item_index: i64,
        user_id: i64,
    ) -> Result<(), DurableError> {
        if self.fail_purchases.load(Ordering::Acquire) {
            return Err(DurableError::Unavailable(
                "purchase failure injected".to_string(),
            ));
        }
        self.inner
            .append_purchase(window_id, item_index, user_id)
            .await
    }

    async fn active_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationRecord>, DurableError> {
        self.inner.active_reservations(now).await
    }

    async fn window_purchases(&self, window_id: i64) -> Result<Vec<PurchaseFact>, DurableError> {
        self.inner.window_purchases(window_id).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DurableError> {
        self.inner.purge_expired(now).await
    }
}
