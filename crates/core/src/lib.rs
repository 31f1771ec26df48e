//! Core types and shared functionality for the hybrid disk cache.
//!
//! This crate provides:
//! - Cache engine with a SQLite index and file-backed large values
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{Cache, CacheEntry, CacheStatus, PurgeScheduler, Storage};
pub use config::CacheConfig;
pub use error::Error;
