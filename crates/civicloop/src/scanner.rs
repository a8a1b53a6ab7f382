//! QR scan session.
//!
//! A camera keeps reporting the same code many times a second. A session
//! hands the first payload to the caller and ignores the rest until reset.

use tracing::debug;

/// One-shot latch over a stream of scanned payloads.
#[derive(Debug, Default)]
pub struct ScanSession {
    captured: Option<String>,
}

impl ScanSession {
    /// A session that has not captured anything yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a scanned payload.
    ///
    /// Returns the payload the first time and `None` for every later scan.
    /// Blank payloads are not captured.
    pub fn offer(&mut self, payload: &str) -> Option<&str> {
        if self.captured.is_some() {
            return None;
        }

        let payload = payload.trim();
        if payload.is_empty() {
            return None;
        }

        debug!("QR payload captured: {}", payload);
        self.captured = Some(payload.to_string());
        self.captured.as_deref()
    }

    /// The captured payload, if any.
    #[must_use]
    pub fn captured(&self) -> Option<&str> {
        self.captured.as_deref()
    }

    /// Accept a new scan.
    pub fn reset(&mut self) {
        self.captured = None;
    }
}
