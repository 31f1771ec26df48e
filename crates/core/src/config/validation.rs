//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use std::time::Duration;

use crate::config::CacheConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

/// Convert a seconds setting to a Duration, rejecting values that are
/// negative, NaN, too large for a Duration, or that round to zero.
pub(crate) fn seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        Ok(_) => Err(ConfigError::Invalid { field: field.into(), reason: "must be at least one nanosecond".into() }),
        Err(e) => Err(ConfigError::Invalid { field: field.into(), reason: format!("not a valid number of seconds: {e}") }),
    }
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `ttl`, `tbd` or `purge_interval` is not a non-zero Duration
    /// - `inline_threshold` is 0
    /// - `path` is empty or names something other than a directory
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ttl()?;
        self.tbd()?;
        self.purge_interval()?;

        if self.inline_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "inline_threshold".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "path".into(), reason: "must not be empty".into() });
        }
        if self.path.exists() && !self.path.is_dir() {
            return Err(ConfigError::Invalid { field: "path".into(), reason: "exists but is not a directory".into() });
        }

        if let Some(db_path) = &self.db_path {
            if db_path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid { field: "db_path".into(), reason: "must not be empty".into() });
            }
            if db_path.is_dir() {
                return Err(ConfigError::Invalid { field: "db_path".into(), reason: "is a directory".into() });
            }
        }

        Ok(())
    }
}
