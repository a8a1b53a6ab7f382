//! Error types for civicloop.
//!
//! This module defines all error types used throughout the civicloop crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for civicloop operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Sync Errors ===
    /// The remote push failed; local records were left untouched.
    #[error("sync failed: {message}")]
    Sync {
        /// Description of what went wrong.
        message: String,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Input Errors ===
    /// Caller-side precondition failed before reaching a store.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The offending input field.
        field: &'static str,
        /// Description of the validation failure.
        message: String,
    },

    // === Collaborator Errors ===
    /// An external collaborator (assistant, classifier, location) failed.
    #[error("{collaborator} unavailable: {message}")]
    Collaborator {
        /// Name of the collaborator.
        collaborator: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },
}

/// A specialized Result type for civicloop operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new sync error.
    #[must_use]
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    /// Create a validation error for the given input field.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Create a collaborator failure.
    #[must_use]
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    /// Check if this error came from a failed remote push.
    #[must_use]
    pub fn is_sync_failure(&self) -> bool {
        matches!(self, Self::Sync { .. } | Self::Http(_) | Self::Timeout { .. })
    }

    /// Check if this error is a rejected caller input.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
