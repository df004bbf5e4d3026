//! Background expiry sweeper.
//!
//! Every sweep period the task cancels reservations past their deadline
//! (releasing their items) and garbage-collects terminal records older than
//! the retention threshold. The sweep snapshots the reservation table under
//! the structural read guard and releases it before cancelling anything;
//! request-path cancellation of the same code is idempotent, so races are
//! absorbed by the state CAS.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::SaleEngine;

/// Spawn the sweeper task for `engine`.
///
/// The task ticks at the configured sweep interval and exits at the next
/// safe point after `shutdown` observes `true`.
pub fn spawn(engine: Arc<SaleEngine>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let period = engine.config().sweep_interval;
    tokio::spawn(async move {
        info!(window_id = engine.window_id(), period = ?period, "expiry sweeper started");
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; consume it so the first
        // sweep happens one full period after startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = engine.sweep();
                    if stats.cancelled > 0 || stats.removed > 0 {
                        debug!(
                            window_id = engine.window_id(),
                            cancelled = stats.cancelled,
                            removed = stats.removed,
                            "sweep completed"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(window_id = engine.window_id(), "expiry sweeper stopped");
    })
}
