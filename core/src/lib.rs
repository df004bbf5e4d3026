//! # Flashsale Core
//!
//! The reservation and purchase engine for the flash-sale coordination
//! service. Each hourly sale window sells exactly N items; clients reserve
//! an item, then confirm the reservation into a purchase. The engine
//! guarantees exactly-one-buyer per item, strict per-user purchase caps,
//! bounded reservation lifetimes, and durable persistence of every sale,
//! while tolerating process restart and recovery from the persistent store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              GenerationManager              │  ← window rotation, drain
//! ├─────────────────────────────────────────────┤
//! │                 SaleEngine                  │
//! │  ItemRegistry      lock-free slot statuses  │  ← atomic CAS only
//! │  ReservationTable  code → record map        │  ← RwLock shape, CAS state
//! │  UserQuotaTable    user → purchase counter  │  ← CAS-loop increments
//! │  ExpirySweeper     background cancellation  │
//! ├─────────────────────────────────────────────┤
//! │            DurableWriter (trait)            │  ← batched, acked appends
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. `reserve(user, item)`: registry CAS `Available → Reserved`, record
//!    insert, durable append awaited, code returned.
//! 2. `purchase(code)`: record lookup, quota increment, registry CAS
//!    `Reserved → Sold`, durable append awaited, confirm or fully roll back.
//!
//! Every fallible step has a paired compensating action; the engine never
//! responds with partial effects.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod durable;
pub mod engine;
pub mod error;
pub mod generation;
pub mod quota;
pub mod recovery;
pub mod registry;
pub mod reservation;
pub mod stats;
pub mod sweeper;

pub use clock::{Clock, SystemClock};
pub use config::SaleConfig;
pub use durable::{DurableWriter, PurchaseFact, ReservationRecord};
pub use engine::SaleEngine;
pub use error::{DurableError, SaleError};
pub use generation::{Generation, GenerationManager};
pub use registry::ItemStatus;
pub use reservation::ReservationState;
pub use stats::EngineStats;

/// Result type alias for engine operations.
pub type SaleResult<T> = Result<T, SaleError>;
