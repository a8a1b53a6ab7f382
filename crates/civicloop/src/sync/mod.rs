//! Outbound sync to the remote record store.
//!
//! A sync attempt ships every pending record as one [`PushBatch`] through a
//! [`SyncTransport`]. The push is all-or-nothing from the local store's point
//! of view: either the whole batch is acknowledged or nothing is marked.

mod http;
pub mod scheduler;
mod simulated;

use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::Result;
use crate::model::{BreakdownRecord, CollectionRecord, SyncRecord};

pub use http::HttpTransport;
pub use scheduler::{run_tick, SchedulerHandle, SyncScheduler, TickOutcome};
pub use simulated::SimulatedTransport;

/// Every record pending at the start of a sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushBatch {
    /// Digest of the pending record ids; stable across retries of the same set.
    pub batch_id: String,
    /// Pending collection events in insertion order.
    pub collections: Vec<CollectionRecord>,
    /// Pending breakdown reports in insertion order.
    pub breakdowns: Vec<BreakdownRecord>,
}

impl PushBatch {
    /// Build a batch and derive its id from the contained record ids.
    #[must_use]
    pub fn new(collections: Vec<CollectionRecord>, breakdowns: Vec<BreakdownRecord>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for record in &collections {
            hasher.update(b"c:");
            hasher.update(record.record_id().as_bytes());
            hasher.update(b"\n");
        }
        for record in &breakdowns {
            hasher.update(b"b:");
            hasher.update(record.record_id().as_bytes());
            hasher.update(b"\n");
        }

        Self {
            batch_id: hasher.finalize().to_hex().to_string(),
            collections,
            breakdowns,
        }
    }

    /// Total number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collections.len() + self.breakdowns.len()
    }

    /// Whether the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The single outbound "push batch" call to the remote store.
#[async_trait::async_trait]
pub trait SyncTransport: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Deliver the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote store did not acknowledge the batch.
    /// Callers treat any error as "nothing was stored".
    async fn push(&self, batch: &PushBatch) -> Result<()>;
}

/// Pick the transport described by the configuration.
///
/// An endpoint selects [`HttpTransport`]; otherwise pushes are simulated.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn transport_from_config(config: &Config) -> Result<Arc<dyn SyncTransport>> {
    match &config.sync.endpoint {
        Some(endpoint) => Ok(Arc::new(HttpTransport::new(
            endpoint,
            &config.sync.collection,
            config.request_timeout(),
        )?)),
        None => Ok(Arc::new(SimulatedTransport::new(config.simulated_latency()))),
    }
}
