//! Engine configuration via `fleet.toml`
//!
//! A default `fleet.toml` can be written next to the deployment's other
//! configuration. To change settings, edit the file and restart.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use fleetstate_concurrency::RetryConfig;
use fleetstate_core::{FleetError, FleetResult};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "fleet.toml";

/// Engine configuration loaded from `fleet.toml`
///
/// # Example
///
/// ```toml
/// max_txn_attempts = 5
/// retry_base_delay_ms = 0
/// retry_max_delay_ms = 20
/// cleanup_interval_ms = 1000
/// # model_uuid = "6f1f6a1c-1d3e-4a53-9f0e-4f3f1c2b7d11"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per transaction before giving up with `RetryBudgetExceeded`
    #[serde(default = "default_max_txn_attempts")]
    pub max_txn_attempts: usize,
    /// Base backoff between attempts, doubled per attempt
    #[serde(default)]
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// How often the cleanup worker processes the queue
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Model all documents belong to; a fresh v4 uuid when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_uuid: Option<String>,
}

fn default_max_txn_attempts() -> usize {
    5
}

fn default_retry_max_delay_ms() -> u64 {
    20
}

fn default_cleanup_interval_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_txn_attempts: default_max_txn_attempts(),
            retry_base_delay_ms: 0,
            retry_max_delay_ms: default_retry_max_delay_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            model_uuid: None,
        }
    }
}

impl EngineConfig {
    /// Check values that serde cannot
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `max_txn_attempts` or `cleanup_interval_ms`
    /// is zero, or `model_uuid` is empty or contains `:`.
    pub fn validate(&self) -> FleetResult<()> {
        if self.max_txn_attempts == 0 {
            return Err(FleetError::invalid_input(
                "max_txn_attempts in fleet.toml must be at least 1",
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(FleetError::invalid_input(
                "cleanup_interval_ms in fleet.toml must be at least 1",
            ));
        }
        if let Some(uuid) = &self.model_uuid {
            if uuid.is_empty() || uuid.contains(':') {
                return Err(FleetError::invalid_input(format!(
                    "invalid model_uuid {uuid:?} in fleet.toml"
                )));
            }
        }
        Ok(())
    }

    /// Retry budget for the transaction runner
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_txn_attempts)
            .with_base_delay_ms(self.retry_base_delay_ms)
            .with_max_delay_ms(self.retry_max_delay_ms)
    }

    /// Cleanup worker interval
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Fleet state engine configuration
#
# Attempts per lifecycle transaction before giving up (default: 5).
# Conflicts come from concurrent writers touching the same entities;
# five attempts make sustained contention negligible.
max_txn_attempts = 5

# Exponential backoff between attempts, in milliseconds.
retry_base_delay_ms = 0
retry_max_delay_ms = 20

# How often the background worker processes deferred cleanups (default: 1000).
cleanup_interval_ms = 1000

# Model uuid prefixed to every document id. Generated when absent.
# model_uuid = "6f1f6a1c-1d3e-4a53-9f0e-4f3f1c2b7d11"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetError::invalid_input(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        content.parse().map_err(|e: FleetError| {
            FleetError::invalid_input(format!("config file '{}': {}", path.display(), e))
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> FleetResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                FleetError::invalid_input(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> FleetResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FleetError::Serialization(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            FleetError::invalid_input(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

impl FromStr for EngineConfig {
    type Err = FleetError;

    fn from_str(s: &str) -> FleetResult<Self> {
        let config: EngineConfig = toml::from_str(s)
            .map_err(|e| FleetError::invalid_input(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
