//! Engine statistics snapshots.
//!
//! Read-only aggregates over the engine's concurrent state, used by the
//! recovery summary log and by operational checks. A snapshot is not a
//! consistent cut: each field is read independently, so totals can be
//! momentarily skewed while requests are in flight. After quiescence the
//! totals agree.

use std::collections::BTreeMap;

use crate::engine::SaleEngine;
use crate::registry::StatusCounts;

/// A point-in-time view of one engine's sale state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// The window the engine serves.
    pub window_id: i64,
    /// Item slots by status.
    pub items: StatusCounts,
    /// Confirmed purchases.
    pub sold_total: i64,
    /// Reservations currently `Active`.
    pub active_reservations: usize,
    /// Total reservation records, terminal ones included.
    pub reservation_records: usize,
    /// Users with at least one confirmed purchase.
    pub buyers: usize,
    /// Sum of all user counters.
    pub quota_total: i64,
    /// Purchase distribution: confirmed-purchase count to number of users
    /// holding exactly that count.
    pub purchase_distribution: BTreeMap<i64, usize>,
}

impl SaleEngine {
    /// Snapshot the engine's aggregate state.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            window_id: self.window_id(),
            items: self.item_counts(),
            sold_total: self.sold_total(),
            active_reservations: self.active_reservations(),
            reservation_records: self.reservations().len(),
            buyers: self.quotas().user_count(),
            quota_total: self.quotas().total(),
            purchase_distribution: self.quotas().distribution(),
        }
    }
}
