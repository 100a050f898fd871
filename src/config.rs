//! Configuration Module
//!
//! Tracker settings with environment overrides.

use std::path::PathBuf;

use crate::requests::RequestOptions;

/// Environment variable overriding the flag storage directory.
pub const DATA_DIR_ENV: &str = "LOCATION_TRACKER_DATA_DIR";

/// Environment variable overriding the elevated-prompt flag key.
pub const FLAG_KEY_ENV: &str = "LOCATION_TRACKER_FLAG_KEY";

/// Default key of the persisted "elevated access already prompted" flag.
pub const DEFAULT_PROMPTED_ELEVATED_KEY: &str = "location_tracker.prompted_elevated_access";

/// Settings for a [`LocationTracker`](crate::tracker::LocationTracker).
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Key of the persisted flag recording that the elevated prompt was shown.
    /// Test instances must use a unique key per instance.
    pub prompted_elevated_key: String,
    /// Options used by one-shot requests that do not specify their own.
    pub default_options: RequestOptions,
    /// Where file-backed flag stores keep their data.
    pub data_dir: PathBuf,
}

impl TrackerConfig {
    /// Defaults overridden by `LOCATION_TRACKER_DATA_DIR` and
    /// `LOCATION_TRACKER_FLAG_KEY` when set.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_dir = std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let prompted_elevated_key = std::env::var(FLAG_KEY_ENV)
            .unwrap_or(defaults.prompted_elevated_key);

        Self {
            prompted_elevated_key,
            default_options: defaults.default_options,
            data_dir,
        }
    }

    pub fn with_prompted_elevated_key(mut self, key: impl Into<String>) -> Self {
        self.prompted_elevated_key = key.into();
        self
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            prompted_elevated_key: DEFAULT_PROMPTED_ELEVATED_KEY.to_string(),
            default_options: RequestOptions::TEN_METERS,
            data_dir: base_directory(),
        }
    }
}

/// Where [`logging::init`](crate::logging::init) writes.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: base_directory().join("logs"),
            file_prefix: "location-tracker.log".to_string(),
        }
    }
}

fn base_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("LocationTracker")
}
