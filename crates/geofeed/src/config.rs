//! Configuration management for geofeed.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::producer::{host_identity, PermissionPolicy};
use crate::record::Position;
use crate::store::DEFAULT_COLLECTION;
use crate::view::ViewOrdering;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "geofeed";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "records.db";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "GEOFEED_";

/// Allowed collection names.
const COLLECTION_PATTERN: &str = r"^[A-Za-z0-9_-]{1,64}$";

/// Highest zoom level served by the standard tile layer.
const MAX_ZOOM: u8 = 19;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `GEOFEED_`, sections split on `__`)
/// 2. TOML config file at `~/.config/geofeed/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Record store configuration.
    pub store: StoreConfig,
    /// Producer configuration.
    pub producer: ProducerConfig,
    /// Live view configuration.
    pub view: ViewConfig,
}

/// Record store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/geofeed/records.db`
    pub database_path: Option<PathBuf>,
    /// Name of the collection records are appended to.
    pub collection: String,
    /// How often to check for writes made by other processes, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Producer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Identity string stamped on records. Defaults to the host identity.
    pub device_info: Option<String>,
    /// Latitude reported by the configured location source.
    pub latitude: Option<f64>,
    /// Longitude reported by the configured location source.
    pub longitude: Option<f64>,
    /// How location permission is decided.
    pub permission: PermissionPolicy,
    /// Bound on waiting for a position fix, in milliseconds.
    pub capture_timeout_ms: u64,
    /// Bound on waiting for the store to accept an append, in milliseconds.
    pub append_timeout_ms: u64,
}

/// Live view configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Display order of the materialized view.
    pub ordering: ViewOrdering,
    /// Zoom level used when focusing the map on a record.
    pub focus_zoom: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            collection: DEFAULT_COLLECTION.to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            device_info: None,
            latitude: None,
            longitude: None,
            permission: PermissionPolicy::default(),
            capture_timeout_ms: 10_000,
            append_timeout_ms: 10_000,
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            ordering: ViewOrdering::default(),
            focus_zoom: 15,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `GEOFEED_`)
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

        let config: Config = Self::figment(&config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
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
        let pattern = Regex::new(COLLECTION_PATTERN).map_err(|e| Error::internal(e.to_string()))?;
        if !pattern.is_match(&self.store.collection) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "invalid collection name '{}': use 1-64 letters, digits, '_' or '-'",
                    self.store.collection
                ),
            });
        }

        if self.store.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_interval_ms must be greater than 0".to_string(),
            });
        }

        if self.producer.capture_timeout_ms == 0 || self.producer.append_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "capture_timeout_ms and append_timeout_ms must be greater than 0"
                    .to_string(),
            });
        }

        match (self.producer.latitude, self.producer.longitude) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::ConfigValidation {
                    message: "latitude and longitude must be set together".to_string(),
                });
            }
            // Any finite pair is stored as given.
            (Some(lat), Some(lng)) if !lat.is_finite() || !lng.is_finite() => {
                return Err(Error::ConfigValidation {
                    message: format!(
                        "latitude and longitude must be finite numbers, got {lat}, {lng}"
                    ),
                });
            }
            _ => {}
        }

        if self.view.focus_zoom == 0 || self.view.focus_zoom > MAX_ZOOM {
            return Err(Error::ConfigValidation {
                message: format!(
                    "focus_zoom must be between 1 and {MAX_ZOOM}, got {}",
                    self.view.focus_zoom
                ),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the identity string stamped on records.
    #[must_use]
    pub fn device_info(&self) -> String {
        self.producer
            .device_info
            .clone()
            .unwrap_or_else(host_identity)
    }

    /// Get the configured position, if both coordinates are set.
    #[must_use]
    pub fn configured_position(&self) -> Option<Position> {
        match (self.producer.latitude, self.producer.longitude) {
            (Some(lat), Some(lng)) => Some(Position::new(lat, lng)),
            _ => None,
        }
    }

    /// Get the external change poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.store.poll_interval_ms)
    }

    /// Get the capture timeout as a Duration.
    #[must_use]
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.producer.capture_timeout_ms)
    }

    /// Get the append timeout as a Duration.
    #[must_use]
    pub fn append_timeout(&self) -> Duration {
        Duration::from_millis(self.producer.append_timeout_ms)
    }
}
