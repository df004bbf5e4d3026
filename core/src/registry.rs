//! Lock-free item registry.
//!
//! A fixed-size array of atomic status words arbitrates slot contention.
//! Every transition is a single compare-and-exchange; no status is ever
//! stored blindly where another status would be valid, so a lost transition
//! cannot corrupt the state.
//!
//! Allowed edges:
//!
//! ```text
//! Available ──try_reserve──▶ Reserved ──try_sell──▶ Sold
//!     ▲                         │  ▲                  │
//!     └────────release──────────┘  └──────unsell──────┘
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::SaleError;

/// Status of a single item slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ItemStatus {
    /// The item is open for reservation.
    Available = 0,
    /// A live reservation holds the item.
    Reserved = 1,
    /// The item has been sold.
    Sold = 2,
}

impl ItemStatus {
    fn from_word(word: u32) -> Self {
        match word {
            1 => Self::Reserved,
            2 => Self::Sold,
            _ => Self::Available,
        }
    }
}

/// Per-status slot counts, used by recovery logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Slots currently available.
    pub available: usize,
    /// Slots currently reserved.
    pub reserved: usize,
    /// Slots currently sold.
    pub sold: usize,
}

/// Fixed-size array of atomic item statuses.
///
/// The registry is the source of truth for slot contention. All transitions
/// are non-blocking and constant-time.
pub struct ItemRegistry {
    slots: Box<[AtomicU32]>,
}

impl ItemRegistry {
    /// Create a registry with `len` items, all `Available`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let slots = (0..len).map(|_| AtomicU32::new(ItemStatus::Available as u32));
        Self {
            slots: slots.collect(),
        }
    }

    /// Number of item slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, index: i64) -> Result<&AtomicU32, SaleError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .ok_or(SaleError::InvalidItemId)
    }

    /// Current status of the item.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::InvalidItemId`] for out-of-range indices.
    pub fn status(&self, index: i64) -> Result<ItemStatus, SaleError> {
        Ok(ItemStatus::from_word(self.slot(index)?.load(Ordering::Acquire)))
    }

    /// Attempt the `Available → Reserved` transition.
    ///
    /// # Errors
    ///
    /// - [`SaleError::InvalidItemId`] for out-of-range indices.
    /// - [`SaleError::ItemAlreadyReserved`] when another reservation won.
    /// - [`SaleError::ItemAlreadySold`] when the item has been sold.
    pub fn try_reserve(&self, index: i64) -> Result<(), SaleError> {
        let slot = self.slot(index)?;
        match slot.compare_exchange(
            ItemStatus::Available as u32,
            ItemStatus::Reserved as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(observed) => match ItemStatus::from_word(observed) {
                ItemStatus::Sold => Err(SaleError::ItemAlreadySold),
                _ => Err(SaleError::ItemAlreadyReserved),
            },
        }
    }

    /// Attempt the `Reserved → Sold` transition. Returns whether this call
    /// won the slot.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::InvalidItemId`] for out-of-range indices.
    pub fn try_sell(&self, index: i64) -> Result<bool, SaleError> {
        let slot = self.slot(index)?;
        Ok(slot
            .compare_exchange(
                ItemStatus::Reserved as u32,
                ItemStatus::Sold as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok())
    }

    /// Release a reserved item back to `Available` (expiry or cancel).
    ///
    /// Must not touch a sold item: the CAS fails silently when the slot is
    /// not `Reserved`. Returns whether the release happened. Out-of-range
    /// indices return `false`; callers on the cancellation path treat the
    /// record as corrupt and drop it.
    pub fn release(&self, index: i64) -> bool {
        self.slot(index).is_ok_and(|slot| {
            slot.compare_exchange(
                ItemStatus::Reserved as u32,
                ItemStatus::Available as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        })
    }

    /// Roll a sold item back to `Reserved` (purchase rollback).
    ///
    /// Returns whether the rollback happened.
    pub fn unsell(&self, index: i64) -> bool {
        self.slot(index).is_ok_and(|slot| {
            slot.compare_exchange(
                ItemStatus::Sold as u32,
                ItemStatus::Reserved as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        })
    }

    /// Force a slot status during recovery, before the engine accepts
    /// requests. Returns the previous status.
    pub(crate) fn set_for_recovery(
        &self,
        index: i64,
        status: ItemStatus,
    ) -> Result<ItemStatus, SaleError> {
        let slot = self.slot(index)?;
        Ok(ItemStatus::from_word(
            slot.swap(status as u32, Ordering::AcqRel),
        ))
    }

    /// Count slots by status.
    #[must_use]
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for slot in &self.slots {
            match ItemStatus::from_word(slot.load(Ordering::Acquire)) {
                ItemStatus::Available => counts.available += 1,
                ItemStatus::Reserved => counts.reserved += 1,
                ItemStatus::Sold => counts.sold += 1,
            }
        }
        counts
    }
}

impl std::fmt::Debug for ItemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemRegistry")
            .field("len", &self.slots.len())
            .field("counts", &self.counts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn reserve_then_sell_walks_the_forward_edges() {
        let registry = ItemRegistry::new(4);
        assert_eq!(registry.status(2), Ok(ItemStatus::Available));

        registry.try_reserve(2).expect("first reserve wins");
        assert_eq!(registry.status(2), Ok(ItemStatus::Reserved));

        assert!(registry.try_sell(2).expect("in range"));
        assert_eq!(registry.status(2), Ok(ItemStatus::Sold));
    }

    #[test]
    fn second_reserve_reports_reserved_then_sold() {
        let registry = ItemRegistry::new(1);
        registry.try_reserve(0).expect("first reserve wins");
        assert_eq!(registry.try_reserve(0), Err(SaleError::ItemAlreadyReserved));

        assert!(registry.try_sell(0).expect("in range"));
        assert_eq!(registry.try_reserve(0), Err(SaleError::ItemAlreadySold));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let registry = ItemRegistry::new(10);
        assert_eq!(registry.status(-1), Err(SaleError::InvalidItemId));
        assert_eq!(registry.status(10), Err(SaleError::InvalidItemId));
        assert_eq!(registry.try_reserve(-1), Err(SaleError::InvalidItemId));
        assert_eq!(registry.try_sell(10), Err(SaleError::InvalidItemId));
        assert!(!registry.release(-1));
        assert!(!registry.unsell(10));
    }

    #[test]
    fn release_never_touches_a_sold_item() {
        let registry = ItemRegistry::new(1);
        registry.try_reserve(0).expect("reserve");
        assert!(registry.try_sell(0).expect("in range"));

        assert!(!registry.release(0));
        assert_eq!(registry.status(0), Ok(ItemStatus::Sold));
    }

    #[test]
    fn unsell_reopens_only_sold_items() {
        let registry = ItemRegistry::new(1);
        assert!(!registry.unsell(0));

        registry.try_reserve(0).expect("reserve");
        assert!(!registry.unsell(0));
        assert!(registry.try_sell(0).expect("in range"));
        assert!(registry.unsell(0));
        assert_eq!(registry.status(0), Ok(ItemStatus::Reserved));
    }

    #[test]
    fn concurrent_reserves_have_exactly_one_winner() {
        let registry = Arc::new(ItemRegistry::new(1));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry.try_reserve(0).is_ok()
            }));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.status(0), Ok(ItemStatus::Reserved));
    }

    #[test]
    fn counts_track_statuses() {
        let registry = ItemRegistry::new(3);
        registry.try_reserve(0).expect("reserve");
        registry.try_reserve(1).expect("reserve");
        assert!(registry.try_sell(1).expect("in range"));

        let counts = registry.counts();
        assert_eq!(counts.available, 1);
        assert_eq!(counts.reserved, 1);
        assert_eq!(counts.sold, 1);
    }
}
