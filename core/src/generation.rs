//! Sale window generations and their rotation.
//!
//! A [`Generation`] binds one engine to one sale window together with its
//! sweeper task. The [`GenerationManager`] owns the current generation
//! pointer, rotates it at window boundaries, and drains the outgoing
//! generation: new requests are rejected with a retryable failure while
//! in-flight requests get a bounded grace period before the generation's
//! background tasks are signalled to stop.
//!
//! Rotation is recover-first: the incoming generation is fully built and
//! recovered before the pointer swaps, and a failed recovery leaves the
//! previous generation in charge.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::SaleConfig;
use crate::durable::DurableWriter;
use crate::engine::SaleEngine;
use crate::recovery;
use crate::sweeper;
use crate::SaleResult;

/// One live engine bound to one sale window.
pub struct Generation {
    engine: Arc<SaleEngine>,
    shutdown: watch::Sender<bool>,
}

impl Generation {
    /// The generation's engine.
    #[must_use]
    pub fn engine(&self) -> Arc<SaleEngine> {
        Arc::clone(&self.engine)
    }

    /// The window this generation serves.
    #[must_use]
    pub fn window_id(&self) -> i64 {
        self.engine.window_id()
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("window_id", &self.window_id())
            .field("accepting", &self.engine.is_accepting())
            .finish_non_exhaustive()
    }
}

/// Owns the current generation and rotates it on window boundaries.
pub struct GenerationManager {
    current: RwLock<Arc<Generation>>,
    config: SaleConfig,
    clock: Arc<dyn Clock>,
    writer: Arc<dyn DurableWriter>,
}

impl GenerationManager {
    /// Bootstrap the manager with a first generation for the current
    /// window.
    ///
    /// # Errors
    ///
    /// Fails when the window cannot be provisioned or recovery fails; with
    /// no previous generation to fall back on, startup aborts.
    pub async fn start(
        config: SaleConfig,
        clock: Arc<dyn Clock>,
        writer: Arc<dyn DurableWriter>,
    ) -> SaleResult<Self> {
        let now = clock.now();
        let window_id = window_id_for(now, config.window_length);
        let generation = build_generation(&config, window_id, &clock, &writer).await?;
        Ok(Self {
            current: RwLock::new(Arc::new(generation)),
            config,
            clock,
            writer,
        })
    }

    /// The current generation.
    #[must_use]
    pub fn current(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The current generation's engine.
    #[must_use]
    pub fn current_engine(&self) -> Arc<SaleEngine> {
        self.current().engine()
    }

    /// Rotate to a fresh generation for the window containing `now`.
    ///
    /// The incoming generation is recovered before the pointer swaps; the
    /// outgoing one is drained in the background. A failed build keeps the
    /// old generation serving.
    ///
    /// # Errors
    ///
    /// Propagates recovery failures; the current generation is untouched.
    pub async fn rotate(&self) -> SaleResult<()> {
        let now = self.clock.now();
        let window_id = window_id_for(now, self.config.window_length);
        if self.current().window_id() == window_id {
            info!(window_id, "rotation skipped, window unchanged");
            return Ok(());
        }

        let next = build_generation(&self.config, window_id, &self.clock, &self.writer).await?;
        let next = Arc::new(next);

        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, Arc::clone(&next))
        };
        // New requests must see the drain the moment the pointer swaps;
        // only the grace wait runs in the background.
        previous.engine.set_accepting(false);
        info!(
            from = previous.window_id(),
            to = next.window_id(),
            "generation swapped"
        );

        let grace = self.config.drain_grace;
        tokio::spawn(drain(previous, grace));
        Ok(())
    }

    /// Run the rotation schedule: sleep until each window boundary, then
    /// rotate. Exits when `shutdown` observes `true`. Rotation failures are
    /// logged and retried at the next boundary; the old generation keeps
    /// serving in the meantime.
    pub async fn run_rotation(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let until_boundary =
                duration_until_next_window(self.clock.now(), self.config.window_length);
            info!(sleep = ?until_boundary, "next rotation scheduled");
            tokio::select! {
                () = tokio::time::sleep(until_boundary) => {
                    if let Err(err) = self.rotate().await {
                        error!(error = %err, "rotation failed, previous generation continues");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        // Drain the final generation on the way out.
        let last = self.current();
        drain(last, self.config.drain_grace).await;
    }

    /// Drain the current generation without replacing it. Used on process
    /// shutdown.
    pub async fn shutdown(&self) {
        drain(self.current(), self.config.drain_grace).await;
    }
}

impl std::fmt::Debug for GenerationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationManager")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

async fn build_generation(
    config: &SaleConfig,
    window_id: i64,
    clock: &Arc<dyn Clock>,
    writer: &Arc<dyn DurableWriter>,
) -> SaleResult<Generation> {
    writer
        .provision_window(
            window_id,
            window_start(window_id, config.window_length),
            config.item_count,
        )
        .await?;

    let engine = Arc::new(
        recovery::recover(
            config.clone(),
            window_id,
            Arc::clone(clock),
            Arc::clone(writer),
        )
        .await?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let _ = sweeper::spawn(Arc::clone(&engine), shutdown_rx);
    engine.set_accepting(true);
    info!(window_id, "generation accepting requests");

    Ok(Generation {
        engine,
        shutdown: shutdown_tx,
    })
}

async fn drain(generation: Arc<Generation>, grace: Duration) {
    generation.engine.set_accepting(false);
    info!(window_id = generation.window_id(), "generation draining");
    tokio::time::sleep(grace).await;
    if generation.shutdown.send(true).is_err() {
        warn!(
            window_id = generation.window_id(),
            "sweeper already stopped before drain completed"
        );
    }
    info!(window_id = generation.window_id(), "generation drained");
}

/// Window identity: index of the window containing `now`, counted from the
/// Unix epoch in units of `window_length`. At the default hour-long window
/// this is hours since the epoch, so identities stay stable across
/// restarts as long as the configured length does not change.
#[must_use]
pub fn window_id_for(now: DateTime<Utc>, window_length: Duration) -> i64 {
    now.timestamp_millis()
        .div_euclid(window_length_millis(window_length))
}

/// The UTC start of a window.
#[must_use]
pub fn window_start(window_id: i64, window_length: Duration) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(window_id.saturating_mul(window_length_millis(window_length)))
        .single()
        .unwrap_or_else(Utc::now)
}

fn duration_until_next_window(now: DateTime<Utc>, window_length: Duration) -> Duration {
    let next = window_start(window_id_for(now, window_length) + 1, window_length);
    (next - now).to_std().unwrap_or(Duration::from_secs(0))
}

fn window_length_millis(window_length: Duration) -> i64 {
    i64::try_from(window_length.as_millis())
        .unwrap_or(i64::MAX)
        .max(1)
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;
    use flashsale_testing::{test_clock, MemoryDurableWriter};

    use super::*;
    use crate::error::SaleError;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn window_ids_are_stable_per_hour() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 14, 0, 0).single().expect("valid");
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 14, 59, 59).single().expect("valid");
        let t2 = Utc.with_ymd_and_hms(2025, 1, 1, 15, 0, 0).single().expect("valid");
        assert_eq!(window_id_for(t0, HOUR), window_id_for(t1, HOUR));
        assert_eq!(window_id_for(t2, HOUR), window_id_for(t0, HOUR) + 1);
        assert_eq!(window_start(window_id_for(t0, HOUR), HOUR), t0);
        assert_eq!(window_start(window_id_for(t0, HOUR), HOUR).minute(), 0);
    }

    #[test]
    fn window_math_follows_the_configured_length() {
        let minute = Duration::from_secs(60);
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 14, 0, 30).single().expect("valid");
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 14, 1, 0).single().expect("valid");
        assert_eq!(window_id_for(t1, minute), window_id_for(t0, minute) + 1);
        assert_eq!(
            window_start(window_id_for(t1, minute), minute),
            t1
        );
        assert_eq!(duration_until_next_window(t0, minute), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn bootstrap_provisions_and_accepts() {
        let clock = Arc::new(test_clock());
        let writer = Arc::new(MemoryDurableWriter::new());
        let manager = GenerationManager::start(
            SaleConfig {
                item_count: 8,
                ..SaleConfig::default()
            },
            clock.clone(),
            writer.clone(),
        )
        .await
        .expect("bootstrap");

        let engine = manager.current_engine();
        assert!(engine.is_accepting());
        assert_eq!(engine.window_id(), window_id_for(clock.now(), HOUR));
        assert!(writer.provisioned_windows().contains(&engine.window_id()));
    }

    #[tokio::test]
    async fn rotation_swaps_and_drains_the_old_generation() {
        let clock = Arc::new(test_clock());
        let writer = Arc::new(MemoryDurableWriter::new());
        let config = SaleConfig {
            item_count: 8,
            drain_grace: Duration::from_millis(10),
            ..SaleConfig::default()
        };
        let manager = GenerationManager::start(config, clock.clone(), writer)
            .await
            .expect("bootstrap");
        let old_engine = manager.current_engine();

        clock.advance(chrono::Duration::hours(1));
        manager.rotate().await.expect("rotate");

        let new_engine = manager.current_engine();
        assert_ne!(old_engine.window_id(), new_engine.window_id());
        assert!(new_engine.is_accepting());
        assert!(!old_engine.is_accepting());
        assert_eq!(old_engine.reserve(1, 0).await, Err(SaleError::Draining));
    }

    #[tokio::test]
    async fn rotation_honors_a_custom_window_length() {
        let clock = Arc::new(test_clock());
        let writer = Arc::new(MemoryDurableWriter::new());
        let config = SaleConfig {
            item_count: 8,
            window_length: Duration::from_secs(60),
            drain_grace: Duration::from_millis(10),
            ..SaleConfig::default()
        };
        let manager = GenerationManager::start(config, clock.clone(), writer)
            .await
            .expect("bootstrap");
        let old_engine = manager.current_engine();

        // One minute, not one hour, ends the window under this config.
        clock.advance(chrono::Duration::seconds(60));
        manager.rotate().await.expect("rotate");
        assert_eq!(
            manager.current_engine().window_id(),
            old_engine.window_id() + 1
        );
    }

    #[tokio::test]
    async fn rotation_is_a_no_op_within_the_same_window() {
        let clock = Arc::new(test_clock());
        let writer = Arc::new(MemoryDurableWriter::new());
        let manager = GenerationManager::start(
            SaleConfig {
                item_count: 8,
                ..SaleConfig::default()
            },
            clock,
            writer,
        )
        .await
        .expect("bootstrap");

        let before = manager.current_engine();
        manager.rotate().await.expect("rotate");
        assert!(Arc::ptr_eq(&before, &manager.current_engine()));
    }

    #[tokio::test]
    async fn failed_recovery_keeps_the_old_generation() {
        let clock = Arc::new(test_clock());
        let writer = Arc::new(MemoryDurableWriter::new());
        let manager = GenerationManager::start(
            SaleConfig {
                item_count: 8,
                ..SaleConfig::default()
            },
            clock.clone(),
            writer.clone(),
        )
        .await
        .expect("bootstrap");
        let old_engine = manager.current_engine();

        clock.advance(chrono::Duration::hours(1));
        writer.fail_recovery(true);
        assert!(manager.rotate().await.is_err());
        writer.fail_recovery(false);

        assert!(Arc::ptr_eq(&old_engine, &manager.current_engine()));
        assert!(old_engine.is_accepting());
    }
}
