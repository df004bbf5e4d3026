//! `PostgreSQL` durable writer for the flash-sale service.
//!
//! Implements the engine's `DurableWriter` boundary on top of sqlx:
//!
//! - Reservation facts are batched (100 records / 50 ms) into one
//!   multi-row `INSERT`; every submitter awaits its batch's
//!   acknowledgement.
//! - Purchase facts are batched (10 records / 10 ms) into a single
//!   conditional `UPDATE ... FROM (VALUES ...)` gated on
//!   `purchased = FALSE`; a short row count fails the batch and the engine
//!   rolls the affected purchases back.
//! - Recovery reads return still-active reservations and the window's
//!   confirmed purchases.
//! - Window provisioning inserts the per-window item rows idempotently.
//!
//! The SQL schema ships as sqlx migrations; run them with
//! [`PgDurableWriter::migrate`].
//!
//! # Example
//!
//! ```no_run
//! use flashsale_postgres::PgDurableWriter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let writer = PgDurableWriter::connect("postgres://localhost/flashsale", 50).await?;
//! writer.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod batch;
pub mod retry;
mod store;

pub use retry::{retry_with_backoff, RetryPolicy};
pub use store::PgDurableWriter;
