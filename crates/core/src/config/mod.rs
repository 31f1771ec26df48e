//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (HDC_*)
//! 2. TOML config file (if HDC_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Index path value that selects an in-memory index.
pub const IN_MEMORY_DB: &str = ":memory:";

/// File name of the index inside the cache root when `db_path` is unset.
pub const DEFAULT_DB_FILE: &str = "cache.db";

/// Cache configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (HDC_*)
/// 2. TOML config file (if HDC_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root directory holding the blob tree (and the index by default).
    ///
    /// Set via HDC_PATH environment variable.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Seconds an entry stays fresh after a write.
    ///
    /// Set via HDC_TTL environment variable.
    #[serde(default = "default_ttl")]
    pub ttl: f64,

    /// Seconds a stale entry stays readable before purge may delete it.
    ///
    /// Set via HDC_TBD environment variable.
    #[serde(default = "default_tbd")]
    pub tbd: f64,

    /// Index database location, `:memory:` for an ephemeral index.
    ///
    /// Set via HDC_DB_PATH environment variable. Defaults to `<path>/cache.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Payloads of at least this many bytes are stored as files.
    ///
    /// Set via HDC_INLINE_THRESHOLD environment variable.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,

    /// Seconds between scheduled purge sweeps.
    ///
    /// Set via HDC_PURGE_INTERVAL environment variable. Defaults to `min(tbd, 3600)`.
    #[serde(default)]
    pub purge_interval: Option<f64>,
}

fn default_path() -> PathBuf {
    std::env::temp_dir().join("hdc")
}

fn default_ttl() -> f64 {
    3600.0
}

fn default_tbd() -> f64 {
    3600.0
}

fn default_inline_threshold() -> usize {
    10 * 1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            ttl: default_ttl(),
            tbd: default_tbd(),
            db_path: None,
            inline_threshold: default_inline_threshold(),
            purge_interval: None,
        }
    }
}

impl CacheConfig {
    /// Default configuration rooted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Default::default() }
    }

    pub fn with_ttl(mut self, seconds: f64) -> Self {
        self.ttl = seconds;
        self
    }

    pub fn with_tbd(mut self, seconds: f64) -> Self {
        self.tbd = seconds;
        self
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(db_path.into());
        self
    }

    /// Keep the index in memory; blobs still go to `path`.
    pub fn in_memory_index(self) -> Self {
        self.with_db_path(IN_MEMORY_DB)
    }

    pub fn with_inline_threshold(mut self, bytes: usize) -> Self {
        self.inline_threshold = bytes;
        self
    }

    pub fn with_purge_interval(mut self, seconds: f64) -> Self {
        self.purge_interval = Some(seconds);
        self
    }

    /// Default time-to-live as a Duration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `ttl` is not representable as a non-zero Duration.
    pub fn ttl(&self) -> Result<Duration, ConfigError> {
        validation::seconds("ttl", self.ttl)
    }

    /// Time-before-deletion as a Duration.
    pub fn tbd(&self) -> Result<Duration, ConfigError> {
        validation::seconds("tbd", self.tbd)
    }

    /// Interval between scheduled purges, capped at one hour unless set explicitly.
    pub fn purge_interval(&self) -> Result<Duration, ConfigError> {
        match self.purge_interval {
            Some(interval) => validation::seconds("purge_interval", interval),
            None => validation::seconds("tbd", self.tbd.min(3600.0)),
        }
    }

    /// Resolved index location, `None` for an in-memory index.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        match &self.db_path {
            Some(p) if p == Path::new(IN_MEMORY_DB) => None,
            Some(p) => Some(p.clone()),
            None => Some(self.path.join(DEFAULT_DB_FILE)),
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `HDC_`
    /// 2. TOML file from `HDC_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("HDC_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("HDC_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
