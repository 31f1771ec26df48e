//! Hybrid disk cache with a SQLite index.
//!
//! This module provides a persistent key-value cache with TTL semantics. It
//! supports:
//!
//! - Inline storage of small payloads in the SQLite index
//! - Content-addressed blob files for large payloads
//! - WAL mode for concurrent access and crash safety
//! - Time-based purge with reclamation of emptied blob directories

pub mod address;
pub mod blobs;
pub mod connection;
pub mod engine;
pub mod entries;
pub mod migrations;
pub mod reclaim;
pub mod scheduler;

pub use crate::Error;

pub use address::address_for;
pub use blobs::BlobStore;
pub use connection::CacheDb;
pub use engine::{Cache, CacheStatus};
pub use entries::{CacheEntry, CacheStats, EntryRef, Storage};
pub use scheduler::PurgeScheduler;
