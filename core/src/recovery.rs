//! Engine recovery from the durable store.
//!
//! A new generation reconstructs consistent in-memory state from persisted
//! facts: confirmed purchases first (items become `Sold`, user counters and
//! `sold_total` accrue), then still-active reservations (items become
//! `Reserved`, records are reinserted as `Active`). Rows that contradict
//! the data model are logged and dropped; they never crash the engine.
//! Replaying the same log into a fresh engine produces identical state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::SaleConfig;
use crate::durable::DurableWriter;
use crate::engine::SaleEngine;
use crate::registry::ItemStatus;
use crate::reservation::Reservation;
use crate::SaleResult;

/// Build an engine for `window_id` and populate it from the durable store.
///
/// The returned engine is not yet accepting requests; the generation
/// manager starts the sweeper and flips acceptance afterwards.
///
/// # Errors
///
/// Returns [`crate::SaleError::InvalidConfig`] for unusable configurations
/// and [`crate::SaleError::Durable`] when a recovery read fails; a failed
/// recovery discards the new engine and leaves the previous generation in
/// charge.
pub async fn recover(
    config: SaleConfig,
    window_id: i64,
    clock: Arc<dyn Clock>,
    writer: Arc<dyn DurableWriter>,
) -> SaleResult<SaleEngine> {
    let engine = SaleEngine::new(config, window_id, clock.clone(), writer.clone())?;

    let purchases = writer.window_purchases(window_id).await?;
    let mut buyer_counts: HashMap<i64, i64> = HashMap::new();
    let mut sold = 0_i64;
    for fact in purchases {
        match engine.registry().status(fact.item_index) {
            Ok(ItemStatus::Sold) => {
                warn!(
                    window_id,
                    item_index = fact.item_index,
                    "duplicate purchase fact, skipping"
                );
            }
            Ok(_) => {
                let _ = engine
                    .registry()
                    .set_for_recovery(fact.item_index, ItemStatus::Sold);
                *buyer_counts.entry(fact.user_id).or_insert(0) += 1;
                sold += 1;
            }
            Err(_) => {
                warn!(
                    window_id,
                    item_index = fact.item_index,
                    "purchase fact points outside the registry, skipping"
                );
            }
        }
    }
    for (user_id, count) in &buyer_counts {
        engine.quotas().load(*user_id, *count);
    }
    engine.set_sold_total(sold);

    let now = clock.now();
    let mut restored = 0_usize;
    for record in writer.active_reservations(now).await? {
        restored += usize::from(restore_reservation(&engine, now, record));
    }

    let purged = writer.purge_expired(now).await?;

    let counts = engine.registry().counts();
    info!(
        window_id,
        sold = counts.sold,
        reserved = counts.reserved,
        available = counts.available,
        buyers = buyer_counts.len(),
        reservations = restored,
        purged,
        "recovery completed"
    );

    Ok(engine)
}

fn restore_reservation(
    engine: &SaleEngine,
    now: DateTime<Utc>,
    record: crate::durable::ReservationRecord,
) -> bool {
    if record.expires_at <= now {
        return false;
    }
    match engine.registry().status(record.item_index) {
        Ok(ItemStatus::Available) => {
            let _ = engine
                .registry()
                .set_for_recovery(record.item_index, ItemStatus::Reserved);
            engine.reservations().insert(Arc::new(Reservation::new(
                record.code,
                record.user_id,
                record.item_index,
                record.created_at,
                record.expires_at,
            )));
            true
        }
        // The reservation was created but the item has since been sold.
        Ok(ItemStatus::Sold) => false,
        Ok(ItemStatus::Reserved) => {
            warn!(
                code = %record.code,
                item_index = record.item_index,
                "second active reservation for one item, dropping"
            );
            false
        }
        Err(_) => {
            warn!(
                code = %record.code,
                item_index = record.item_index,
                "persisted reservation points outside the registry, dropping"
            );
            false
        }
    }
}
