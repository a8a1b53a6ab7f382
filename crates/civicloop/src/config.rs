//! Configuration management for civicloop.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "civicloop";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "civicloop.db";

/// Driver id stamped on records until real driver accounts exist.
pub const MOCK_DRIVER_ID: &str = "DRV-101";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (`CIVICLOOP_<SECTION>__<KEY>`, e.g. `CIVICLOOP_SYNC__INTERVAL_SECS`)
/// 2. TOML config file at `~/.config/civicloop/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Sync configuration.
    pub sync: SyncConfig,
    /// Device and crew configuration.
    pub device: DeviceConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/civicloop/civicloop.db`
    pub database_path: Option<PathBuf>,
}

/// Sync-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between background sync attempts.
    pub interval_secs: u64,
    /// Remote endpoint for batch pushes. When unset, pushes are simulated.
    pub endpoint: Option<String>,
    /// Remote collection the batches are written into.
    pub collection: String,
    /// Latency of the simulated push in milliseconds.
    pub simulated_latency_ms: u64,
    /// Timeout for a single HTTP push in seconds.
    pub request_timeout_secs: u64,
}

/// Device and crew configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Driver id stamped on every record.
    pub driver_id: String,
    /// How long to wait for a location fix before falling back to 0,0.
    pub location_timeout_ms: u64,
    /// Work zones offered during profile setup.
    pub wards: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
            endpoint: None,
            collection: "waste_collections".to_string(),
            simulated_latency_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            driver_id: MOCK_DRIVER_ID.to_string(),
            location_timeout_ms: 15_000,
            wards: default_wards(),
        }
    }
}

/// Default work zones.
fn default_wards() -> Vec<String> {
    vec![
        "Ward 1 - Indiranagar".to_string(),
        "Ward 2 - Koramangala".to_string(),
        "Ward 3 - Whitefield".to_string(),
        "Ward 4 - Jayanagar".to_string(),
    ]
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `CIVICLOOP_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("CIVICLOOP_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.sync.interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.interval_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.request_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.request_timeout_secs must be greater than 0".to_string(),
            });
        }

        if let Some(endpoint) = &self.sync.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::ConfigValidation {
                    message: format!("sync.endpoint must be an http(s) URL: {endpoint}"),
                });
            }
        }

        if self.sync.collection.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "sync.collection cannot be empty".to_string(),
            });
        }

        if self.device.driver_id.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "device.driver_id cannot be empty".to_string(),
            });
        }

        if self.device.wards.is_empty() {
            return Err(Error::ConfigValidation {
                message: "device.wards must list at least one ward".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the background sync interval as a Duration.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// Get the simulated push latency as a Duration.
    #[must_use]
    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.sync.simulated_latency_ms)
    }

    /// Get the HTTP push timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    /// Get the location fix timeout as a Duration.
    #[must_use]
    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.device.location_timeout_ms)
    }
}
