//! The reservation and purchase engine.
//!
//! `SaleEngine` owns all in-memory sale state for one window and drives the
//! two-phase protocol between that state and the durable writer. Request
//! paths are straight-line sequences of atomic operations; the only
//! suspension point on either path is the awaited durable acknowledgement.
//! Every fallible step pairs with a compensating action, so a caller never
//! observes partial effects.
//!
//! # Rollback ordering
//!
//! On the purchase path the quota increment runs strictly before the
//! registry commit. A commit that fails later unwinds in reverse: record
//! state, then item status, then the quota counter via a conditional
//! decrement. Reordering these steps would admit an over-quota commit that
//! cannot be undone.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SaleConfig;
use crate::durable::{DurableWriter, ReservationRecord};
use crate::error::{DurableError, SaleError};
use crate::quota::UserQuotaTable;
use crate::registry::{ItemRegistry, ItemStatus, StatusCounts};
use crate::reservation::{Reservation, ReservationState, ReservationTable};
use crate::SaleResult;

/// Counts from one sweeper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired reservations cancelled this pass.
    pub cancelled: usize,
    /// Stale terminal records removed this pass.
    pub removed: usize,
}

/// The in-memory concurrent state machine for one sale window.
pub struct SaleEngine {
    config: SaleConfig,
    window_id: i64,
    registry: ItemRegistry,
    reservations: ReservationTable,
    quotas: UserQuotaTable,
    sold_total: AtomicI64,
    accepting: AtomicBool,
    hold: Duration,
    retention: Duration,
    clock: Arc<dyn Clock>,
    writer: Arc<dyn DurableWriter>,
}

impl SaleEngine {
    /// Build an engine with fresh state for `window_id`.
    ///
    /// The engine starts in the non-accepting state; the generation manager
    /// flips it once recovery completes and the sweeper is running.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::InvalidConfig`] for configurations that cannot
    /// support a working engine.
    pub fn new(
        config: SaleConfig,
        window_id: i64,
        clock: Arc<dyn Clock>,
        writer: Arc<dyn DurableWriter>,
    ) -> SaleResult<Self> {
        config.validate()?;
        let hold = Duration::from_std(config.hold_duration)
            .map_err(|_| SaleError::InvalidConfig("hold_duration out of range".to_string()))?;
        let retention = Duration::from_std(config.terminal_retention).map_err(|_| {
            SaleError::InvalidConfig("terminal_retention out of range".to_string())
        })?;
        let item_count = usize::try_from(config.item_count)
            .map_err(|_| SaleError::InvalidConfig("item_count out of range".to_string()))?;

        Ok(Self {
            registry: ItemRegistry::new(item_count),
            reservations: ReservationTable::new(),
            quotas: UserQuotaTable::new(config.per_user_limit),
            sold_total: AtomicI64::new(0),
            accepting: AtomicBool::new(false),
            hold,
            retention,
            window_id,
            config,
            clock,
            writer,
        })
    }

    /// Reserve `item_id` for `user_id`, returning the reservation code.
    ///
    /// Protocol: validate bounds, pre-check sell-out and the user quota,
    /// win the registry CAS, insert the record, then await the durable
    /// acknowledgement. A failed append rolls the reservation back
    /// completely before the error is returned.
    ///
    /// The sell-out pre-check reads the confirmed-purchase counter, so a
    /// reserve may slip past the theoretical sell-out moment while the last
    /// purchases are still in flight; the purchase path is the authority.
    ///
    /// # Errors
    ///
    /// `InvalidItemId`, `AllItemsPurchased`, `UserLimitExceeded`,
    /// `ItemAlreadyReserved`, `ItemAlreadySold`, `Draining`, or
    /// `Durable(_)` after a completed rollback.
    pub async fn reserve(&self, user_id: i64, item_id: i64) -> SaleResult<Uuid> {
        if !self.is_accepting() {
            return Err(SaleError::Draining);
        }
        if item_id < 0 || item_id >= self.config.item_count {
            return Err(SaleError::InvalidItemId);
        }
        if self.sold_total() >= self.config.item_count {
            return Err(SaleError::AllItemsPurchased);
        }
        if self.quotas.at_limit(user_id) {
            return Err(SaleError::UserLimitExceeded);
        }

        self.registry.try_reserve(item_id)?;

        let now = self.clock.now();
        let reservation = Arc::new(Reservation::new(
            Uuid::new_v4(),
            user_id,
            item_id,
            now,
            now + self.hold,
        ));
        let code = reservation.code();
        let record = ReservationRecord::from(reservation.as_ref());
        self.reservations.insert(reservation);

        if let Err(err) = self
            .with_ack_timeout(self.writer.append_reservation(record))
            .await
        {
            self.reservations
                .transition(&code, ReservationState::Active, ReservationState::Cancelled);
            self.registry.release(item_id);
            self.reservations.remove(&code);
            warn!(
                user_id,
                item_id,
                error = %err,
                "reservation append failed, rolled back"
            );
            return Err(SaleError::Durable(err));
        }

        debug!(user_id, item_id, code = %code, "reservation created");
        Ok(code)
    }

    /// Confirm the reservation identified by `code` into a purchase.
    ///
    /// Protocol: look the record up, verify it is `Active` and unexpired,
    /// increment the user quota, win the registry `Reserved → Sold` CAS,
    /// mark the record `Purchased`, then await the durable acknowledgement.
    /// Failures unwind in reverse order; a failed append restores the
    /// record to `Active`, the item to `Reserved`, and the quota counter.
    ///
    /// # Errors
    ///
    /// `ReservationNotFound`, `ReservationExpired`,
    /// `ReservationAlreadyCompleted`, `UserLimitExceeded`,
    /// `PurchaseNotAllowed`, `Draining`, or `Durable(_)` after a completed
    /// rollback.
    pub async fn purchase(&self, code: Uuid) -> SaleResult<()> {
        if !self.is_accepting() {
            return Err(SaleError::Draining);
        }

        let reservation = self
            .reservations
            .lookup(&code)
            .ok_or(SaleError::ReservationNotFound)?;

        match reservation.state() {
            ReservationState::Purchased => return Err(SaleError::ReservationAlreadyCompleted),
            ReservationState::Cancelled => return Err(SaleError::ReservationExpired),
            ReservationState::Active => {}
        }

        let now = self.clock.now();
        if reservation.is_expired(now) {
            self.cancel(&code);
            return Err(SaleError::ReservationExpired);
        }

        let item_index = reservation.item_index();
        let user_id = reservation.user_id();
        if item_index < 0 || item_index >= self.config.item_count {
            // Corrupt record; drop it rather than crash the engine.
            warn!(code = %code, item_index, "reservation points outside the registry, dropping");
            self.reservations
                .transition(&code, ReservationState::Active, ReservationState::Cancelled);
            self.reservations.remove(&code);
            return Err(SaleError::PurchaseNotAllowed);
        }

        // Quota before commit: the cap must be observable before the slot
        // CAS, otherwise two racing purchases could both pass the check.
        let new_count = self.quotas.try_increment(user_id)?;

        match self.registry.try_sell(item_index) {
            Ok(true) => {}
            Ok(false) => {
                self.quotas.decrement_if_equals(user_id, new_count);
                // A racing expiry released the slot, or the slot never
                // reached Reserved; either way the purchase does not commit.
                let err = match self.registry.status(item_index) {
                    Ok(ItemStatus::Available) => SaleError::ReservationExpired,
                    _ => SaleError::PurchaseNotAllowed,
                };
                return Err(err);
            }
            Err(err) => {
                self.quotas.decrement_if_equals(user_id, new_count);
                return Err(err);
            }
        }

        if !self
            .reservations
            .transition(&code, ReservationState::Active, ReservationState::Purchased)
        {
            // The sweeper cancelled between the expiry check and here; its
            // release saw Sold and backed off, so unwind the sale fully.
            self.registry.unsell(item_index);
            self.registry.release(item_index);
            self.quotas.decrement_if_equals(user_id, new_count);
            return Err(SaleError::ReservationExpired);
        }

        if let Err(err) = self
            .with_ack_timeout(
                self.writer
                    .append_purchase(self.window_id, item_index, user_id),
            )
            .await
        {
            self.reservations
                .transition(&code, ReservationState::Purchased, ReservationState::Active);
            self.registry.unsell(item_index);
            self.quotas.decrement_if_equals(user_id, new_count);
            warn!(
                user_id,
                item_index,
                code = %code,
                error = %err,
                "purchase append failed, rolled back"
            );
            return Err(SaleError::Durable(err));
        }

        self.sold_total.fetch_add(1, Ordering::AcqRel);
        self.reservations.remove(&code);
        debug!(user_id, item_index, code = %code, "purchase confirmed");
        Ok(())
    }

    /// Cancel an `Active` reservation, releasing its item.
    ///
    /// Idempotent with respect to racing cancellations and purchases: the
    /// state CAS absorbs the race, and a purchase that already sold the
    /// item keeps it.
    pub fn cancel(&self, code: &Uuid) {
        let Some(reservation) = self.reservations.lookup(code) else {
            return;
        };
        if reservation.transition(ReservationState::Active, ReservationState::Cancelled) {
            let item_index = reservation.item_index();
            if !self.registry.release(item_index)
                && self.registry.status(item_index) == Err(SaleError::InvalidItemId)
            {
                warn!(code = %code, item_index, "cancelled reservation pointed outside the registry");
            }
        }
    }

    /// Run one sweep: cancel expired reservations and garbage-collect
    /// terminal records past the retention threshold.
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now();
        let sweepable = self.reservations.collect_sweepable(now, self.retention);
        let mut stats = SweepStats::default();
        // The structural read guard was released inside collect_sweepable;
        // cancellation must not run under it.
        for code in &sweepable.expired {
            self.cancel(code);
            stats.cancelled += 1;
        }
        for code in &sweepable.stale {
            if self.reservations.remove(code) {
                stats.removed += 1;
            }
        }
        stats
    }

    async fn with_ack_timeout<F>(&self, append: F) -> Result<(), DurableError>
    where
        F: Future<Output = Result<(), DurableError>> + Send,
    {
        match tokio::time::timeout(self.config.ack_timeout, append).await {
            Ok(result) => result,
            Err(_) => Err(DurableError::Timeout),
        }
    }

    /// Whether the engine accepts new requests.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Flip request acceptance; the generation manager owns this.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    /// Number of confirmed purchases in this window.
    #[must_use]
    pub fn sold_total(&self) -> i64 {
        self.sold_total.load(Ordering::Acquire)
    }

    /// The window this engine serves.
    #[must_use]
    pub const fn window_id(&self) -> i64 {
        self.window_id
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &SaleConfig {
        &self.config
    }

    /// Current status of an item.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::InvalidItemId`] for out-of-range indices.
    pub fn item_status(&self, item_id: i64) -> SaleResult<ItemStatus> {
        self.registry.status(item_id)
    }

    /// Confirmed purchases for a user, if any.
    #[must_use]
    pub fn purchase_count(&self, user_id: i64) -> Option<i64> {
        self.quotas.count(user_id)
    }

    /// Current state of a reservation, if the record still exists.
    #[must_use]
    pub fn reservation_state(&self, code: &Uuid) -> Option<ReservationState> {
        self.reservations.lookup(code).map(|r| r.state())
    }

    /// Number of reservations currently `Active`.
    #[must_use]
    pub fn active_reservations(&self) -> usize {
        self.reservations.active_count()
    }

    /// Per-status item counts.
    #[must_use]
    pub fn item_counts(&self) -> StatusCounts {
        self.registry.counts()
    }

    /// Sum of all user counters.
    #[must_use]
    pub fn quota_total(&self) -> i64 {
        self.quotas.total()
    }

    pub(crate) fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    pub(crate) fn reservations(&self) -> &ReservationTable {
        &self.reservations
    }

    pub(crate) fn quotas(&self) -> &UserQuotaTable {
        &self.quotas
    }

    pub(crate) fn set_sold_total(&self, value: i64) {
        self.sold_total.store(value, Ordering::Release);
    }
}

impl std::fmt::Debug for SaleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaleEngine")
            .field("window_id", &self.window_id)
            .field("accepting", &self.is_accepting())
            .field("sold_total", &self.sold_total())
            .field("items", &self.registry.counts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use flashsale_testing::{test_clock, MemoryDurableWriter, SteppingClock};

    use super::*;

    fn engine(item_count: i64, per_user_limit: i64) -> (SaleEngine, Arc<SteppingClock>) {
        let clock = Arc::new(test_clock());
        let engine = SaleEngine::new(
            SaleConfig {
                item_count,
                per_user_limit,
                ..SaleConfig::default()
            },
            1,
            clock.clone(),
            Arc::new(MemoryDurableWriter::new()),
        )
        .expect("valid config");
        engine.set_accepting(true);
        (engine, clock)
    }

    #[test]
    fn construction_rejects_invalid_configs() {
        let bad = SaleConfig {
            item_count: -3,
            ..SaleConfig::default()
        };
        let result = SaleEngine::new(
            bad,
            1,
            Arc::new(test_clock()),
            Arc::new(MemoryDurableWriter::new()),
        );
        assert!(matches!(result, Err(SaleError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn invalid_item_id_wins_over_sell_out() {
        let (engine, _clock) = engine(1, 2);
        let code = engine.reserve(1, 0).await.expect("reserve");
        engine.purchase(code).await.expect("purchase");

        // Out-of-range input is an input error even once sold out.
        assert_eq!(engine.reserve(2, 5).await, Err(SaleError::InvalidItemId));
        assert_eq!(engine.reserve(2, 0).await, Err(SaleError::AllItemsPurchased));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_tolerates_unknown_codes() {
        let (engine, _clock) = engine(4, 2);

        // Unknown code: nothing to do.
        engine.cancel(&Uuid::new_v4());

        let code = engine.reserve(1, 2).await.expect("reserve");
        engine.cancel(&code);
        assert_eq!(engine.item_status(2), Ok(ItemStatus::Available));
        assert_eq!(
            engine.reservation_state(&code),
            Some(ReservationState::Cancelled)
        );

        // A second cancel changes nothing.
        engine.cancel(&code);
        assert_eq!(engine.item_status(2), Ok(ItemStatus::Available));
    }

    #[tokio::test]
    async fn cancelled_code_cannot_be_purchased() {
        let (engine, _clock) = engine(4, 2);
        let code = engine.reserve(1, 2).await.expect("reserve");
        engine.cancel(&code);

        assert_eq!(
            engine.purchase(code).await,
            Err(SaleError::ReservationExpired)
        );
        assert_eq!(engine.purchase_count(1), None);
    }

    #[tokio::test]
    async fn sweep_reports_cancellations_and_removals() {
        let (engine, clock) = engine(4, 2);

        engine.reserve(1, 0).await.expect("reserve");
        engine.reserve(2, 1).await.expect("reserve");

        clock.advance(chrono::Duration::seconds(4));
        let stats = engine.sweep();
        assert_eq!(stats.cancelled, 2);
        assert_eq!(stats.removed, 0);
        assert_eq!(engine.active_reservations(), 0);

        // Past the retention threshold the terminal records are collected.
        clock.advance(chrono::Duration::hours(2));
        let stats = engine.sweep();
        assert_eq!(stats.cancelled, 0);
        assert_eq!(stats.removed, 2);
        assert_eq!(engine.reservations().len(), 0);
    }

    #[tokio::test]
    async fn fresh_codes_are_unique_per_reservation() {
        let (engine, clock) = engine(2, 4);

        let a = engine.reserve(1, 0).await.expect("reserve");
        let b = engine.reserve(1, 1).await.expect("reserve");
        assert_ne!(a, b);

        clock.advance(chrono::Duration::seconds(4));
        engine.sweep();
        let c = engine.reserve(1, 0).await.expect("reserve again");
        assert_ne!(a, c);
    }
}
