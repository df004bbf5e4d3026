//! Engine configuration.
//!
//! Loads sale parameters from environment variables with the production
//! defaults: 10,000 items per window, 10 purchases per user, 3 second
//! reservation hold, 5 second sweep period, hourly windows.

use std::env;
use std::time::Duration;

use serde::Serialize;

use crate::error::SaleError;

/// Parameters governing one sale window.
#[derive(Debug, Clone, Serialize)]
pub struct SaleConfig {
    /// Number of items offered per window (N).
    pub item_count: i64,
    /// Confirmed purchases allowed per user per window.
    pub per_user_limit: i64,
    /// How long a reservation holds its item before expiring.
    pub hold_duration: Duration,
    /// Period of the expiry sweeper.
    pub sweep_interval: Duration,
    /// Age after which terminal reservation records are garbage-collected.
    pub terminal_retention: Duration,
    /// Length of a sale window.
    pub window_length: Duration,
    /// Grace period granted to in-flight requests while draining.
    pub drain_grace: Duration,
    /// Maximum time to await a durable acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            item_count: 10_000,
            per_user_limit: 10,
            hold_duration: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(5),
            terminal_retention: Duration::from_secs(3600),
            window_length: Duration::from_secs(3600),
            drain_grace: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(2),
        }
    }
}

impl SaleConfig {
    /// Load configuration from `FLASHSALE_*` environment variables, falling
    /// back to the defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            item_count: env_parse("FLASHSALE_ITEM_COUNT", defaults.item_count),
            per_user_limit: env_parse("FLASHSALE_PER_USER_LIMIT", defaults.per_user_limit),
            hold_duration: env_millis("FLASHSALE_HOLD_MS", defaults.hold_duration),
            sweep_interval: env_millis("FLASHSALE_SWEEP_INTERVAL_MS", defaults.sweep_interval),
            terminal_retention: env_millis(
                "FLASHSALE_TERMINAL_RETENTION_MS",
                defaults.terminal_retention,
            ),
            window_length: env_millis("FLASHSALE_WINDOW_LENGTH_MS", defaults.window_length),
            drain_grace: env_millis("FLASHSALE_DRAIN_GRACE_MS", defaults.drain_grace),
            ack_timeout: env_millis("FLASHSALE_ACK_TIMEOUT_MS", defaults.ack_timeout),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::InvalidConfig`] when a parameter cannot support
    /// a working engine (zero or negative item count, zero cap, zero hold).
    pub fn validate(&self) -> Result<(), SaleError> {
        if self.item_count <= 0 {
            return Err(SaleError::InvalidConfig(format!(
                "item_count must be positive, got {}",
                self.item_count
            )));
        }
        if self.per_user_limit <= 0 {
            return Err(SaleError::InvalidConfig(format!(
                "per_user_limit must be positive, got {}",
                self.per_user_limit
            )));
        }
        if self.hold_duration.is_zero() {
            return Err(SaleError::InvalidConfig(
                "hold_duration must be non-zero".to_string(),
            ));
        }
        if self.window_length.is_zero() {
            return Err(SaleError::InvalidConfig(
                "window_length must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_millis)
}
