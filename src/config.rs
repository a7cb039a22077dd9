//! Engine configuration
//!
//! `EngineConfig` is read once at construction. `TradeLogSettings` holds the
//! toggles that may change while the engine runs; they are snapshotted once
//! per batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{BucketTimeZone, SaveOptions};
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Persistence engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root folder of the storage backend (default: ".")
    #[serde(default = "default_data_folder")]
    pub data_folder: PathBuf,

    /// Name of the storage type to resolve in the writer registry (default: "csv")
    #[serde(default = "default_storage")]
    pub storage: String,

    /// Delay between the first pending record and the save (default: 30s)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Attempts per save before the batch is requeued (default: 20)
    #[serde(default = "default_save_max_attempts")]
    pub save_max_attempts: u32,

    /// Delay between two attempts of one save (default: 25ms)
    #[serde(default = "default_save_retry_delay_ms")]
    pub save_retry_delay_ms: u64,

    /// Minimum interval between two operator notices about failed saves (default: 5min)
    #[serde(default = "default_failure_notice_throttle_secs")]
    pub failure_notice_throttle_secs: u64,

    /// Time zone for bucket dates and time columns (default: utc)
    #[serde(default)]
    pub bucket_time_zone: BucketTimeZone,
}

fn default_data_folder() -> PathBuf {
    PathBuf::from(".")
}

fn default_storage() -> String {
    "csv".to_string()
}

fn default_debounce_ms() -> u64 {
    30_000
}

fn default_save_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_save_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_failure_notice_throttle_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_folder: default_data_folder(),
            storage: default_storage(),
            debounce_ms: default_debounce_ms(),
            save_max_attempts: default_save_max_attempts(),
            save_retry_delay_ms: default_save_retry_delay_ms(),
            failure_notice_throttle_secs: default_failure_notice_throttle_secs(),
            bucket_time_zone: BucketTimeZone::default(),
        }
    }
}

impl EngineConfig {
    /// Create a default config rooted at `data_folder`
    pub fn with_data_folder(data_folder: impl Into<PathBuf>) -> Self {
        Self {
            data_folder: data_folder.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "save_max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.storage.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "storage",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    pub fn bucket_time_zone(&self) -> BucketTimeZone {
        self.bucket_time_zone
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn failure_notice_throttle(&self) -> Duration {
        Duration::from_secs(self.failure_notice_throttle_secs)
    }

    /// Retry policy applied to every save.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.save_max_attempts, Duration::from_millis(self.save_retry_delay_ms))
    }
}

/// Live toggles read by the engine at the start of every save.
#[derive(Debug, Default)]
pub struct TradeLogSettings {
    log_item_metadata: AtomicBool,
}

impl TradeLogSettings {
    pub fn new(log_item_metadata: bool) -> Self {
        Self {
            log_item_metadata: AtomicBool::new(log_item_metadata),
        }
    }

    pub fn log_item_metadata(&self) -> bool {
        self.log_item_metadata.load(Ordering::Relaxed)
    }

    /// Takes effect with the next batch; a batch in flight keeps its snapshot.
    pub fn set_log_item_metadata(&self, enabled: bool) {
        self.log_item_metadata.store(enabled, Ordering::Relaxed);
    }

    /// Snapshot used for one batch.
    pub fn snapshot(&self) -> SaveOptions {
        SaveOptions {
            log_item_metadata: self.log_item_metadata(),
        }
    }
}
