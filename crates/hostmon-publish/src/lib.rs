//! Shipping sampled metrics to a remote aggregator.
//!
//! The [`NetworkPublisher`] owns a bounded FIFO queue fed by the
//! collection scheduler. A dedicated worker drains batches on a fixed
//! cadence, serializes the JSON envelope, and posts it over blocking
//! HTTP with exponential backoff. When every retry fails the batch is
//! dropped and counted: the agent prefers bounded memory over lossless
//! delivery, and the local store already holds a durable copy.

pub mod client;
pub mod discovery;
pub mod publisher;
pub mod transport;

#[cfg(test)]
mod tests;

pub use discovery::{DiscoveryMethod, ServiceEndpoint};
pub use publisher::{NetworkPublisher, PublishConfig, PublisherStats, QueuedMetric};
pub use transport::{HttpTransport, MetricTransport, TransportError};

/// Maximum metrics drained into a single outbound batch.
pub const BATCH_LIMIT: usize = 100;

/// Ceiling for the exponential retry delay.
pub const MAX_BACKOFF_MS: u64 = 30_000;
