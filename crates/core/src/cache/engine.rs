//! The cache engine.
//!
//! Small payloads are stored inline in the index; payloads of at least
//! `inline_threshold` bytes are written to a blob file whose path is derived
//! from the key. Entries are fresh until their expiry, stale (still readable)
//! for `tbd` seconds after that, and then eligible for [`Cache::purge`].

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::address::address_for;
use super::blobs::BlobStore;
use super::connection::CacheDb;
use super::entries::{CacheEntry, CacheStats, Storage};
use super::reclaim::reclaim_within;
use crate::config::CacheConfig;
use crate::Error;

/// Number of per-key lock stripes.
const STRIPES: usize = 64;

/// Freshness of a key as reported by [`Cache::has`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Stale => "stale",
            CacheStatus::Miss => "miss",
        }
    }
}

/// Hybrid disk cache handle.
///
/// Cheap to clone; clones share the index connection, blob root and key locks.
#[derive(Clone, Debug)]
pub struct Cache {
    db: CacheDb,
    blobs: BlobStore,
    config: Arc<CacheConfig>,
    stripes: Arc<[Mutex<()>]>,
}

/// Current time as fractional Unix seconds.
pub(crate) fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Cache {
    /// Open (or create) the cache described by `config`.
    ///
    /// Creates the cache root, opens the index and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid settings, `Error::Io` if the root
    /// cannot be created, and `Error::Database` if the index cannot be opened.
    pub async fn open(config: CacheConfig) -> Result<Self, Error> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.path)
            .await
            .map_err(|e| Error::io(&config.path, e))?;

        let db = match config.resolved_db_path() {
            Some(db_path) => {
                if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| Error::io(parent, e))?;
                }
                CacheDb::open(&db_path).await?
            }
            None => CacheDb::open_in_memory().await?,
        };

        tracing::info!(
            path = %config.path.display(),
            db = ?config.resolved_db_path(),
            ttl = config.ttl,
            tbd = config.tbd,
            "cache opened"
        );

        let blobs = BlobStore::new(&config.path);
        let stripes: Arc<[Mutex<()>]> = (0..STRIPES).map(|_| Mutex::new(())).collect();
        Ok(Self { db, blobs, config: Arc::new(config), stripes })
    }

    /// Cache root directory.
    pub fn path(&self) -> &Path {
        self.blobs.root()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Direct access to the index.
    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    fn stripe(&self, address: &str) -> &Mutex<()> {
        let bucket = address.get(..2).and_then(|h| u8::from_str_radix(h, 16).ok()).unwrap_or(0);
        &self.stripes[bucket as usize % self.stripes.len()]
    }

    /// Store `payload` under `key`, replacing any previous value.
    ///
    /// The entry stays fresh for `ttl`, or the configured default when None.
    /// A key that moves from file storage to inline storage has its old blob
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the blob cannot be written,
    /// `Error::Database` if the index update fails, and `Error::Config` if the
    /// default ttl is unusable.
    pub async fn set(&self, key: impl AsRef<[u8]>, payload: &[u8], ttl: Option<Duration>) -> Result<(), Error> {
        let key = key.as_ref();
        let address = address_for(key);
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => self.config.ttl()?,
        };
        let expiry = unix_now() + ttl.as_secs_f64();

        let _guard = self.stripe(&address).lock().await;

        if payload.len() >= self.config.inline_threshold {
            // Blob first: the row must never point at a file that isn't there yet.
            self.blobs.write(&address, payload).await?;
            self.db.upsert_entry(key, &Storage::File(address), expiry).await?;
        } else {
            let previous = self.db.get_file_reference(key).await?;
            self.db
                .upsert_entry(key, &Storage::Inline(payload.to_vec()), expiry)
                .await?;
            if let Some(previous) = previous {
                self.blobs.delete(&previous).await;
            }
        }

        tracing::debug!(size = payload.len(), expiry, "cache set");
        Ok(())
    }

    /// Fetch the payload stored under `key`, whether fresh or stale.
    ///
    /// Returns None on a miss. A file-backed entry whose blob has vanished is
    /// reported as a miss.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>, Error> {
        let key = key.as_ref();
        let Some(entry) = self.db.get_entry(key).await? else {
            return Ok(None);
        };

        let filename = match entry.storage {
            Storage::Inline(value) => return Ok(Some(value)),
            Storage::File(filename) => filename,
        };
        if let Some(value) = self.blobs.read(&filename).await? {
            return Ok(Some(value));
        }

        // The row may have moved to inline storage (deleting the blob) after we
        // read it. Re-read under the key's lock, where row and blob agree.
        let _guard = self.stripe(&filename).lock().await;
        match self.db.get_entry(key).await?.map(|e| e.storage) {
            None => Ok(None),
            Some(Storage::Inline(value)) => Ok(Some(value)),
            Some(Storage::File(filename)) => {
                let value = self.blobs.read(&filename).await?;
                if value.is_none() {
                    tracing::warn!(file = %filename, "blob referenced by index is missing");
                }
                Ok(value)
            }
        }
    }

    /// Fetch the payload under `key`, or `default` on a miss.
    pub async fn get_or(&self, key: impl AsRef<[u8]>, default: Vec<u8>) -> Result<Vec<u8>, Error> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Index row for `key`, without reading any blob.
    pub async fn entry(&self, key: impl AsRef<[u8]>) -> Result<Option<CacheEntry>, Error> {
        self.db.get_entry(key.as_ref()).await
    }

    /// Classify `key` as a fresh hit, a stale entry or a miss.
    pub async fn has(&self, key: impl AsRef<[u8]>) -> Result<CacheStatus, Error> {
        let status = match self.db.get_expiry(key.as_ref()).await? {
            None => CacheStatus::Miss,
            Some(expiry) if unix_now() < expiry => CacheStatus::Hit,
            Some(_) => CacheStatus::Stale,
        };
        Ok(status)
    }

    /// Delete `key` and its blob, if any.
    ///
    /// Returns whether the key existed. Deleting a missing key is a no-op.
    pub async fn del(&self, key: impl AsRef<[u8]>) -> Result<bool, Error> {
        let key = key.as_ref();
        let _guard = self.stripe(&address_for(key)).lock().await;

        let Some(removed) = self.db.delete_entry(key).await? else {
            return Ok(false);
        };
        if let Some(filename) = removed.filename {
            self.blobs.delete(&filename).await;
        }
        Ok(true)
    }

    /// Delete every entry whose stale window has ended, then remove emptied
    /// blob directories.
    ///
    /// Returns the number of index rows deleted. Blob and directory cleanup is
    /// best effort and never fails the sweep.
    pub async fn purge(&self) -> Result<u64, Error> {
        let started = Instant::now();
        let threshold = unix_now() - self.config.tbd;
        let removed = self.db.take_expired_before(threshold).await?;

        let mut files = 0usize;
        for (key, filename) in removed.iter().filter_map(|r| Some((&r.key, r.filename.as_deref()?))) {
            let _guard = self.stripe(filename).lock().await;
            // A concurrent set may have rewritten this blob for a fresh row.
            match self.db.references_file(key, filename).await {
                Ok(true) => continue,
                Ok(false) => {
                    if self.blobs.delete(filename).await {
                        files += 1;
                    }
                }
                Err(e) => tracing::warn!(file = %filename, error = %e, "skipping blob delete"),
            }
        }

        let root = self.blobs.root().to_path_buf();
        let reclaimed = match tokio::task::spawn_blocking(move || reclaim_within(&root)).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "directory reclaim did not finish");
                0
            }
        };

        tracing::info!(
            purged = removed.len(),
            files,
            reclaimed_dirs = reclaimed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "purge complete"
        );
        Ok(removed.len() as u64)
    }

    /// Number of entries in the index, stale ones included.
    pub async fn len(&self) -> Result<u64, Error> {
        self.db.count_entries().await
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }

    pub async fn stats(&self) -> Result<CacheStats, Error> {
        self.db.stats().await
    }
}
