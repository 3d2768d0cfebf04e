//! Configuration settings for replayq.
//!
//! Settings are loaded from `~/.replayq/config.yaml`. Every section falls
//! back to its defaults, so a partial file is enough.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::error::QueueError;
use crate::queue::{Operation, SupportedKinds};
use crate::sync::{DriverConfig, Retention, RetryPolicy};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resource kinds the queue accepts. Empty accepts nothing.
    pub entity_types: Vec<String>,
    /// Enabled operations.
    pub operations: Vec<Operation>,
    /// Drain cycle settings.
    pub sync: SyncConfig,
    /// HTTP remote settings.
    pub remote: RemoteConfig,
}

/// Drain cycle and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entries dispatched concurrently per batch.
    pub batch_size: usize,
    /// Failed attempts before an entry is marked failed.
    pub max_retries: u32,
    /// Periodic trigger while online, in seconds.
    pub interval_secs: u64,
    /// Upper bound on one remote call, in seconds.
    pub apply_timeout_secs: u64,
    /// Base backoff delay in milliseconds; 0 disables backoff.
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// What to do with synced entries.
    pub retention: Retention,
}

/// HTTP remote settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL; entity endpoints are `{base_url}/{entity_type}`.
    pub base_url: Option<String>,
    /// Health check path, relative to the base URL.
    pub health_path: String,
    /// Seconds between health checks in `watch` mode.
    pub probe_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            operations: Operation::ALL.to_vec(),
            sync: SyncConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            interval_secs: 30,
            apply_timeout_secs: 15,
            backoff_base_ms: 0,
            backoff_max_ms: 300_000,
            retention: Retention::Keep,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            health_path: "/health".to_string(),
            probe_interval_secs: 10,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries).with_backoff(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    #[must_use]
    pub const fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            batch_size: self.batch_size,
            apply_timeout: self.apply_timeout(),
            retention: self.retention,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, QueueError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// holds invalid values.
    pub fn load_from_path(path: &Path) -> Result<Self, QueueError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            QueueError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            QueueError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Config` naming the offending key.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.sync.batch_size == 0 {
            return Err(QueueError::Config("sync.batch_size must be at least 1".to_string()));
        }
        if self.sync.max_retries == 0 {
            return Err(QueueError::Config("sync.max_retries must be at least 1".to_string()));
        }
        if self.sync.interval_secs == 0 {
            return Err(QueueError::Config("sync.interval_secs must be at least 1".to_string()));
        }
        if self.sync.apply_timeout_secs == 0 {
            return Err(QueueError::Config(
                "sync.apply_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.remote.probe_interval_secs == 0 {
            return Err(QueueError::Config(
                "remote.probe_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The entity types and operations the queue accepts.
    #[must_use]
    pub fn kinds(&self) -> SupportedKinds {
        SupportedKinds::new(self.entity_types.iter().cloned())
            .with_operations(self.operations.iter().copied())
    }
}
