//! Per-user purchase quotas.
//!
//! A reader-writer guard protects the map shape; each user's counter is an
//! atomic that CAS-loops against the cap, so increments are never lost or
//! doubled. In the purchase protocol the increment runs strictly before the
//! registry commit; a failed commit is undone with a conditional decrement
//! that absorbs concurrent-failure races.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::SaleError;

/// Map from user id to confirmed-purchase counter for the current window.
#[derive(Debug)]
pub struct UserQuotaTable {
    users: RwLock<HashMap<i64, Arc<AtomicI64>>>,
    limit: i64,
}

impl UserQuotaTable {
    /// Create an empty table enforcing `limit` purchases per user.
    #[must_use]
    pub fn new(limit: i64) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            limit,
        }
    }

    /// The per-user cap.
    #[must_use]
    pub const fn limit(&self) -> i64 {
        self.limit
    }

    fn counter(&self, user_id: i64) -> Option<Arc<AtomicI64>> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.get(&user_id).cloned()
    }

    /// Increment the user's counter if the cap permits, creating the entry
    /// at 1 for a first purchase. Returns the counter value this increment
    /// produced.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::UserLimitExceeded`] when the increment would
    /// push the counter past the cap.
    pub fn try_increment(&self, user_id: i64) -> Result<i64, SaleError> {
        if let Some(counter) = self.counter(user_id) {
            return self.increment_existing(&counter);
        }

        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(counter) = users.get(&user_id) {
            // Another request created the entry while we upgraded the lock.
            let counter = Arc::clone(counter);
            drop(users);
            return self.increment_existing(&counter);
        }
        users.insert(user_id, Arc::new(AtomicI64::new(1)));
        Ok(1)
    }

    fn increment_existing(&self, counter: &AtomicI64) -> Result<i64, SaleError> {
        let mut current = counter.load(Ordering::Acquire);
        loop {
            if current >= self.limit {
                return Err(SaleError::UserLimitExceeded);
            }
            match counter.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(observed) => current = observed,
            }
        }
    }

    /// Undo the increment that produced `expected`, but only if the counter
    /// still holds that value. When another increment has already moved the
    /// counter past `expected` the decrement deliberately no-ops; the
    /// counter stays monotonic from the surviving purchase's perspective.
    /// Returns whether the decrement happened.
    pub fn decrement_if_equals(&self, user_id: i64, expected: i64) -> bool {
        self.counter(user_id).is_some_and(|counter| {
            counter
                .compare_exchange(
                    expected,
                    expected - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        })
    }

    /// Confirmed purchases for the user, if an entry exists.
    #[must_use]
    pub fn count(&self, user_id: i64) -> Option<i64> {
        self.counter(user_id).map(|c| c.load(Ordering::Acquire))
    }

    /// Best-effort read of whether the user is already at the cap.
    #[must_use]
    pub fn at_limit(&self, user_id: i64) -> bool {
        self.count(user_id).is_some_and(|c| c >= self.limit)
    }

    /// Seed a counter during recovery, before the engine accepts requests.
    pub(crate) fn load(&self, user_id: i64, count: i64) {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        users.insert(user_id, Arc::new(AtomicI64::new(count)));
    }

    /// Number of users with an entry.
    #[must_use]
    pub fn user_count(&self) -> usize {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.len()
    }

    /// Sum of all counters; equals the confirmed-purchase total after
    /// quiescence.
    #[must_use]
    pub fn total(&self) -> i64 {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.values().map(|c| c.load(Ordering::Acquire)).sum()
    }

    /// Purchase distribution: counter value to number of users holding it.
    /// Users whose counter rolled back to zero are skipped.
    #[must_use]
    pub fn distribution(&self) -> std::collections::BTreeMap<i64, usize> {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        let mut distribution = std::collections::BTreeMap::new();
        for counter in users.values() {
            let count = counter.load(Ordering::Acquire);
            if count > 0 {
                *distribution.entry(count).or_insert(0) += 1;
            }
        }
        distribution
    }
}
