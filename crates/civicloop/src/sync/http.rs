//! HTTP transport posting batches to a remote collection endpoint.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::{PushBatch, SyncTransport};
use crate::error::{Error, Result};

/// Posts each batch as JSON to `{endpoint}/collections/{collection}/batches`.
///
/// The batch id travels in the `Idempotency-Key` header so the server can
/// drop replays of a batch it already stored.
#[derive(Debug)]
pub struct HttpTransport {
    url: String,
    client: Client,
}

impl HttpTransport {
    /// Build a transport for the given endpoint and remote collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: &str, collection: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: batch_url(endpoint, collection),
            client,
        })
    }

    /// The URL batches are posted to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn batch_url(endpoint: &str, collection: &str) -> String {
    format!(
        "{}/collections/{}/batches",
        endpoint.trim_end_matches('/'),
        collection
    )
}

#[async_trait::async_trait]
impl SyncTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn push(&self, batch: &PushBatch) -> Result<()> {
        debug!("POST {} batch {}", self.url, batch.batch_id);

        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &batch.batch_id)
            .json(batch)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: format!("push to {}", self.url),
                    }
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Remote store rejected batch {}: {}", batch.batch_id, status);
        Err(Error::sync(format!(
            "remote store responded {status}: {}",
            body.trim()
        )))
    }
}
