//! Index entry CRUD operations.
//!
//! Provides functions for creating, reading, and deleting cache index rows,
//! plus the expiry-range scans used by purge.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, TransactionBehavior};

/// Where an entry's payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    /// Payload stored in the index row.
    Inline(Vec<u8>),
    /// Blob path relative to the cache root.
    File(String),
}

impl Storage {
    fn from_columns(key: &[u8], value: Option<Vec<u8>>, filename: Option<String>) -> Result<Self, Error> {
        match (value, filename) {
            (Some(value), None) => Ok(Storage::Inline(value)),
            (None, Some(filename)) => Ok(Storage::File(filename)),
            _ => Err(Error::CorruptEntry(format!(
                "entry {} must have exactly one of value or filename",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    fn columns(&self) -> (Option<&[u8]>, Option<&str>) {
        match self {
            Storage::Inline(value) => (Some(value.as_slice()), None),
            Storage::File(filename) => (None, Some(filename.as_str())),
        }
    }

    pub fn file_reference(&self) -> Option<&str> {
        match self {
            Storage::File(filename) => Some(filename),
            Storage::Inline(_) => None,
        }
    }
}

/// A row of the cache index.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: Vec<u8>,
    pub storage: Storage,
    /// Unix seconds after which the entry is stale.
    pub expiry: f64,
}

/// Key and blob reference of a removed or removable row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub key: Vec<u8>,
    pub filename: Option<String>,
}

/// Aggregate counts over the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub inline_entries: u64,
    pub file_entries: u64,
    pub inline_bytes: u64,
}

/// Primary-key lookup; `filename` has no index.
const REFERENCES_FILE_SQL: &str = "SELECT EXISTS(SELECT 1 FROM entries WHERE key = ?1 AND filename = ?2)";

fn entry_ref(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRef> {
    Ok(EntryRef { key: row.get(0)?, filename: row.get(1)? })
}

impl CacheDb {
    /// Insert or replace the row for `key`.
    ///
    /// Uses UPSERT semantics: the value columns and expiry are overwritten
    /// together, so a row never mixes old and new storage.
    pub async fn upsert_entry(&self, key: &[u8], storage: &Storage, expiry: f64) -> Result<(), Error> {
        let key = key.to_vec();
        let storage = storage.clone();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let (value, filename) = storage.columns();
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO entries (key, value, filename, expiry) VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        filename = excluded.filename,
                        expiry = excluded.expiry",
                )?;
                stmt.execute(params![key, value, filename, expiry])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get the row for `key`.
    ///
    /// Returns None if the key doesn't exist in the index.
    pub async fn get_entry(&self, key: &[u8]) -> Result<Option<CacheEntry>, Error> {
        let key = key.to_vec();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, Error> {
                let mut stmt = conn.prepare_cached("SELECT value, filename, expiry FROM entries WHERE key = ?1")?;
                let row = stmt
                    .query_row(params![key], |row| {
                        Ok((row.get::<_, Option<Vec<u8>>>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, f64>(2)?))
                    })
                    .optional()?;

                match row {
                    Some((value, filename, expiry)) => {
                        let storage = Storage::from_columns(&key, value, filename)?;
                        Ok(Some(CacheEntry { key, storage, expiry }))
                    }
                    None => Ok(None),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Get only the expiry of `key`, without loading an inline payload.
    pub async fn get_expiry(&self, key: &[u8]) -> Result<Option<f64>, Error> {
        let key = key.to_vec();
        self.conn
            .call(move |conn| -> Result<Option<f64>, Error> {
                let mut stmt = conn.prepare_cached("SELECT expiry FROM entries WHERE key = ?1")?;
                Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Get the blob reference stored for `key`, None if absent or inline.
    pub async fn get_file_reference(&self, key: &[u8]) -> Result<Option<String>, Error> {
        let key = key.to_vec();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let mut stmt = conn.prepare_cached("SELECT filename FROM entries WHERE key = ?1")?;
                let filename: Option<Option<String>> = stmt.query_row(params![key], |row| row.get(0)).optional()?;
                Ok(filename.flatten())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the row for `key`.
    ///
    /// Returns the removed row's blob reference so the caller can release the
    /// file, or None if the key did not exist.
    pub async fn delete_entry(&self, key: &[u8]) -> Result<Option<EntryRef>, Error> {
        let key = key.to_vec();
        self.conn
            .call(move |conn| -> Result<Option<EntryRef>, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let filename: Option<Option<String>> = tx
                    .query_row("SELECT filename FROM entries WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()?;
                let Some(filename) = filename else {
                    return Ok(None);
                };
                tx.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
                tx.commit()?;
                Ok(Some(EntryRef { key, filename }))
            })
            .await
            .map_err(Error::from)
    }

    /// List rows whose expiry is strictly before `threshold`.
    pub async fn scan_expired_before(&self, threshold: f64) -> Result<Vec<EntryRef>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<EntryRef>, Error> {
                let mut stmt = conn.prepare_cached("SELECT key, filename FROM entries WHERE expiry < ?1")?;
                let rows = stmt
                    .query_map(params![threshold], entry_ref)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete rows whose expiry is strictly before `threshold`.
    ///
    /// Returns the number of deleted rows.
    pub async fn delete_expired_before(&self, threshold: f64) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM entries WHERE expiry < ?1", params![threshold])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Scan and delete rows expiring before `threshold` in one transaction.
    ///
    /// The returned rows are exactly the rows deleted, even if writers touch
    /// the table concurrently.
    pub async fn take_expired_before(&self, threshold: f64) -> Result<Vec<EntryRef>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<EntryRef>, Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let rows = tx
                    .prepare("SELECT key, filename FROM entries WHERE expiry < ?1")?
                    .query_map(params![threshold], entry_ref)?
                    .collect::<Result<Vec<_>, _>>()?;
                tx.execute("DELETE FROM entries WHERE expiry < ?1", params![threshold])?;
                tx.commit()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)
    }

    /// Whether the row for `key` currently points at the blob `filename`.
    ///
    /// Blob paths are derived from keys, so only that row can reference it.
    pub async fn references_file(&self, key: &[u8], filename: &str) -> Result<bool, Error> {
        let key = key.to_vec();
        let filename = filename.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let mut stmt = conn.prepare_cached(REFERENCES_FILE_SQL)?;
                let exists: bool = stmt.query_row(params![key, filename], |row| row.get(0))?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of rows in the index.
    pub async fn count_entries(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Row counts by storage kind and total inline bytes.
    pub async fn stats(&self) -> Result<CacheStats, Error> {
        self.conn
            .call(|conn| -> Result<CacheStats, Error> {
                let stats = conn.query_row(
                    "SELECT COUNT(*), COUNT(value), COUNT(filename), COALESCE(SUM(LENGTH(value)), 0) FROM entries",
                    [],
                    |row| {
                        Ok(CacheStats {
                            entries: row.get::<_, i64>(0)? as u64,
                            inline_entries: row.get::<_, i64>(1)? as u64,
                            file_entries: row.get::<_, i64>(2)? as u64,
                            inline_bytes: row.get::<_, i64>(3)? as u64,
                        })
                    },
                )?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::address::address_for;

    fn file_storage(key: &[u8]) -> Storage {
        Storage::File(address_for(key))
    }

    #[tokio::test]
    async fn test_upsert_and_get_inline() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"A", &Storage::Inline(b"B".to_vec()), 100.0).await.unwrap();

        let entry = db.get_entry(b"A").await.unwrap().unwrap();
        assert_eq!(entry.key, b"A".to_vec());
        assert_eq!(entry.storage, Storage::Inline(b"B".to_vec()));
        assert_eq!(entry.expiry, 100.0);
    }

    #[tokio::test]
    async fn test_upsert_empty_inline_value() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"empty", &Storage::Inline(Vec::new()), 1.0).await.unwrap();

        let entry = db.get_entry(b"empty").await.unwrap().unwrap();
        assert_eq!(entry.storage, Storage::Inline(Vec::new()));
    }

    #[tokio::test]
    async fn test_upsert_switches_storage() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"k", &file_storage(b"k"), 1.0).await.unwrap();
        assert_eq!(db.get_file_reference(b"k").await.unwrap(), Some(address_for(b"k")));

        db.upsert_entry(b"k", &Storage::Inline(b"small".to_vec()), 2.0).await.unwrap();
        let entry = db.get_entry(b"k").await.unwrap().unwrap();
        assert_eq!(entry.storage, Storage::Inline(b"small".to_vec()));
        assert_eq!(entry.expiry, 2.0);
        assert_eq!(db.get_file_reference(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_entry(b"nonexistent").await.unwrap().is_none());
        assert!(db.get_expiry(b"nonexistent").await.unwrap().is_none());
        assert!(db.get_file_reference(b"nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_returns_file_reference() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"big", &file_storage(b"big"), 1.0).await.unwrap();
        db.upsert_entry(b"small", &Storage::Inline(b"x".to_vec()), 1.0).await.unwrap();

        let removed = db.delete_entry(b"big").await.unwrap().unwrap();
        assert_eq!(removed.filename, Some(address_for(b"big")));

        let removed = db.delete_entry(b"small").await.unwrap().unwrap();
        assert_eq!(removed.filename, None);

        assert!(db.delete_entry(b"small").await.unwrap().is_none());
        assert_eq!(db.count_entries().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expiry_range_operations() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"old", &file_storage(b"old"), 10.0).await.unwrap();
        db.upsert_entry(b"edge", &Storage::Inline(b"e".to_vec()), 20.0).await.unwrap();
        db.upsert_entry(b"new", &Storage::Inline(b"n".to_vec()), 30.0).await.unwrap();

        let expired = db.scan_expired_before(20.0).await.unwrap();
        assert_eq!(expired, vec![EntryRef { key: b"old".to_vec(), filename: Some(address_for(b"old")) }]);

        assert_eq!(db.delete_expired_before(20.0).await.unwrap(), 1);
        assert_eq!(db.delete_expired_before(20.0).await.unwrap(), 0);
        assert_eq!(db.count_entries().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_take_expired_before() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"a", &Storage::Inline(b"a".to_vec()), 1.0).await.unwrap();
        db.upsert_entry(b"b", &file_storage(b"b"), 2.0).await.unwrap();
        db.upsert_entry(b"c", &Storage::Inline(b"c".to_vec()), 3.0).await.unwrap();

        let mut taken = db.take_expired_before(3.0).await.unwrap();
        taken.sort_by(|x, y| x.key.cmp(&y.key));
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].key, b"a".to_vec());
        assert_eq!(taken[1].filename, Some(address_for(b"b")));

        assert!(db.get_entry(b"c").await.unwrap().is_some());
        assert!(db.take_expired_before(3.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_references_file() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"k", &file_storage(b"k"), 1.0).await.unwrap();
        db.upsert_entry(b"inline", &Storage::Inline(b"x".to_vec()), 1.0).await.unwrap();

        assert!(db.references_file(b"k", &address_for(b"k")).await.unwrap());
        assert!(!db.references_file(b"k", &address_for(b"other")).await.unwrap());
        assert!(!db.references_file(b"inline", &address_for(b"inline")).await.unwrap());
        assert!(!db.references_file(b"absent", &address_for(b"absent")).await.unwrap());
    }

    #[tokio::test]
    async fn test_references_file_uses_primary_key() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let plan: Vec<String> = db
            .conn
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {REFERENCES_FILE_SQL}"))?;
                let details = stmt
                    .query_map(params![b"k".to_vec(), "a/b/c.v"], |row| row.get::<_, String>(3))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(details)
            })
            .await
            .unwrap();

        assert!(plan.iter().any(|d| d.contains("SEARCH entries")), "plan: {plan:?}");
        assert!(!plan.iter().any(|d| d.contains("SCAN entries")), "plan: {plan:?}");
    }

    #[tokio::test]
    async fn test_stats() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_entry(b"a", &Storage::Inline(vec![0; 5]), 1.0).await.unwrap();
        db.upsert_entry(b"b", &Storage::Inline(vec![0; 7]), 1.0).await.unwrap();
        db.upsert_entry(b"c", &file_storage(b"c"), 1.0).await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats, CacheStats { entries: 3, inline_entries: 2, file_entries: 1, inline_bytes: 12 });
    }
}
