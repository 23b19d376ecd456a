//! Time-series storage for host metrics.
//!
//! A single SQLite database in WAL mode holds the raw `metrics` table plus
//! two rolled-up tiers (`metrics_1m`, `metrics_1h`). Writes are batched in
//! memory and committed in one transaction per flush; readers only ever see
//! committed rows. Schema changes are gated by a `schema_version` table and
//! the store refuses to open a database written by a newer version.

pub mod error;
pub mod rollup;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::{Result, StorageError};
pub use rollup::{TieredRetention, TieredSweep};
pub use store::{MetricStore, StoreConfig, StoreStats};

/// Hard cap on the in-memory write batch. Writes that would grow the
/// batch past this fail with [`StorageError::BufferFull`].
pub const MAX_BATCH_POINTS: usize = 10_000;

/// Number of processes persisted per tick (top by CPU).
pub const MAX_PERSISTED_PROCESSES: usize = 20;
