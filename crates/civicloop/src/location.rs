//! Best-effort device location.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::GeoLocation;

/// Source of the device's current position.
#[async_trait::async_trait]
pub trait LocationProvider: Send + Sync {
    /// Current position.
    ///
    /// # Errors
    ///
    /// Returns an error if no fix could be obtained.
    async fn current(&self) -> Result<GeoLocation>;
}

/// Provider that always reports the same position.
///
/// Used when coordinates come from the command line.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub GeoLocation);

#[async_trait::async_trait]
impl LocationProvider for FixedLocation {
    async fn current(&self) -> Result<GeoLocation> {
        Ok(self.0)
    }
}

/// Provider for devices without a position source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait::async_trait]
impl LocationProvider for NoLocation {
    async fn current(&self) -> Result<GeoLocation> {
        Err(Error::collaborator("location", "no position source available"))
    }
}

/// Ask `provider` for a fix, falling back to `(0, 0)` on error or timeout.
pub async fn best_effort_location(
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> GeoLocation {
    match tokio::time::timeout(timeout, provider.current()).await {
        Ok(Ok(location)) => {
            debug!(lat = location.lat, lng = location.lng, "Location acquired");
            location
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Location unavailable, using (0, 0)");
            GeoLocation::unknown()
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis(), "Location timed out, using (0, 0)");
            GeoLocation::unknown()
        }
    }
}
