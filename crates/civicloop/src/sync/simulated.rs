//! In-process stand-in for the remote store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::debug;

use super::{PushBatch, SyncTransport};
use crate::error::{Error, Result};

/// Transport that waits for a fixed latency and then acknowledges the batch.
///
/// Can be told to fail instead, for dry runs of the error path.
#[derive(Debug)]
pub struct SimulatedTransport {
    latency: Duration,
    failure: Option<String>,
    pushes: AtomicU64,
}

impl SimulatedTransport {
    /// Acknowledge every batch after `latency`.
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failure: None,
            pushes: AtomicU64::new(0),
        }
    }

    /// Acknowledge every batch immediately.
    #[must_use]
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Reject every batch with `message` after the configured latency.
    #[must_use]
    pub fn failing(latency: Duration, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(latency)
        }
    }

    /// Number of push attempts seen so far.
    #[must_use]
    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SyncTransport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn push(&self, batch: &PushBatch) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Simulating push of batch {} ({} records)",
            batch.batch_id,
            batch.len()
        );

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match &self.failure {
            Some(message) => Err(Error::sync(message.clone())),
            None => Ok(()),
        }
    }
}
