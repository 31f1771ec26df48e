//! End-to-end behavior of the cache through its public API.

use std::path::Path;
use std::time::Duration;

use hdc_core::cache::address_for;
use hdc_core::{Cache, CacheConfig, CacheStatus, Storage};
use tempfile::TempDir;

async fn open(config: impl FnOnce(CacheConfig) -> CacheConfig) -> (TempDir, Cache) {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::open(config(CacheConfig::new(dir.path()))).await.unwrap();
    (dir, cache)
}

fn count_blob_dirs(root: &Path) -> usize {
    std::fs::read_dir(root)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().unwrap().is_dir())
        .count()
}

#[tokio::test]
async fn large_payload_is_file_backed() {
    let (dir, cache) = open(|c| c).await;
    let buf = vec![b'A'; 10_001];

    cache.set("A", &buf, None).await.unwrap();

    let entry = cache.entry("A").await.unwrap().unwrap();
    assert_eq!(entry.storage, Storage::File(address_for(b"A")));
    assert!(dir.path().join(address_for(b"A")).is_file());
    assert_eq!(cache.get("A").await.unwrap(), Some(buf));
}

#[tokio::test]
async fn round_trips_on_both_sides_of_threshold() {
    let (_dir, cache) = open(|c| c).await;
    let payloads: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"B".to_vec(),
        (0..=255u8).cycle().take(10_239).collect(),
        (0..=255u8).cycle().take(10_240).collect(),
        (0..=255u8).rev().cycle().take(200_000).collect(),
    ];

    for (i, payload) in payloads.iter().enumerate() {
        cache.set(format!("key-{i}"), payload, None).await.unwrap();
    }
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(cache.get(format!("key-{i}")).await.unwrap().as_ref(), Some(payload));
    }
}

#[tokio::test]
async fn overwrite_across_threshold() {
    let (_dir, cache) = open(|c| c).await;
    let small = b"small".to_vec();
    let large = vec![9u8; 50_000];

    for (first, second) in [(&small, &large), (&large, &small), (&large, &large), (&small, &small)] {
        cache.set("k", first, None).await.unwrap();
        cache.set("k", second, None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_ref(), Some(second));
    }
}

#[tokio::test]
async fn stale_entry_still_readable() {
    let (_dir, cache) = open(|c| c).await;
    let buf = b"1".to_vec();

    cache.set("k", &buf, Some(Duration::from_millis(100))).await.unwrap();
    assert_eq!(cache.has("k").await.unwrap(), CacheStatus::Hit);

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(cache.has("k").await.unwrap(), CacheStatus::Stale);
    assert_eq!(cache.get("k").await.unwrap(), Some(buf));
    assert_eq!(cache.has("key:2").await.unwrap(), CacheStatus::Miss);
}

#[tokio::test]
async fn purge_after_tbd_removes_entry_and_blob() {
    let (dir, cache) = open(|c| c.with_ttl(0.1).with_tbd(0.1)).await;
    let buf = vec![b'A'; 20_000];

    cache.set("key:l1", &buf, None).await.unwrap();
    assert_eq!(cache.get("key:l1").await.unwrap(), Some(buf));

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(cache.purge().await.unwrap(), 1);
    assert_eq!(cache.get("key:l1").await.unwrap(), None);
    assert!(!dir.path().join(address_for(b"key:l1")).exists());
    assert_eq!(count_blob_dirs(dir.path()), 0, "emptied blob directories are reclaimed");
    assert!(dir.path().join("cache.db").is_file(), "cache root and index survive");

    assert_eq!(cache.purge().await.unwrap(), 0);
}

#[tokio::test]
async fn purge_removes_exactly_the_expired_set() {
    let (dir, cache) = open(|c| c.with_tbd(0.2)).await;

    cache.set("gone-inline", b"x", Some(Duration::ZERO)).await.unwrap();
    cache.set("gone-file", &vec![1u8; 20_000], Some(Duration::ZERO)).await.unwrap();
    cache.set("kept-file", &vec![2u8; 20_000], None).await.unwrap();
    cache.set("kept-inline", b"y", None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    // Stale but still inside its tbd window.
    cache.set("stale", b"z", Some(Duration::ZERO)).await.unwrap();

    assert_eq!(cache.purge().await.unwrap(), 2);
    assert_eq!(cache.get("gone-inline").await.unwrap(), None);
    assert_eq!(cache.get("gone-file").await.unwrap(), None);
    assert!(!dir.path().join(address_for(b"gone-file")).exists());

    assert_eq!(cache.get("kept-file").await.unwrap(), Some(vec![2u8; 20_000]));
    assert_eq!(cache.get("kept-inline").await.unwrap(), Some(b"y".to_vec()));
    assert_eq!(cache.has("stale").await.unwrap(), CacheStatus::Stale);
    assert!(dir.path().join(address_for(b"kept-file")).is_file());

    assert_eq!(cache.purge().await.unwrap(), 0);
    assert_eq!(cache.len().await.unwrap(), 3);
}

#[tokio::test]
async fn del_removes_blob_and_is_idempotent() {
    let (dir, cache) = open(|c| c).await;
    cache.set("big", &vec![3u8; 30_000], None).await.unwrap();

    assert!(cache.del("big").await.unwrap());
    assert_eq!(cache.get("big").await.unwrap(), None);
    assert_eq!(cache.get_or("big", b"default".to_vec()).await.unwrap(), b"default".to_vec());
    assert!(!dir.path().join(address_for(b"big")).exists());

    assert!(!cache.del("big").await.unwrap());
    assert!(!cache.del("never").await.unwrap());
}

#[tokio::test]
async fn entries_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path());

    let cache = Cache::open(config.clone()).await.unwrap();
    cache.set("inline", b"v", None).await.unwrap();
    cache.set("file", &vec![4u8; 20_000], None).await.unwrap();
    drop(cache);

    let cache = Cache::open(config).await.unwrap();
    assert_eq!(cache.get("inline").await.unwrap(), Some(b"v".to_vec()));
    assert_eq!(cache.get("file").await.unwrap(), Some(vec![4u8; 20_000]));
    assert_eq!(cache.has("inline").await.unwrap(), CacheStatus::Hit);
}

#[tokio::test]
async fn separate_index_path() {
    let blobs = tempfile::tempdir().unwrap();
    let index = tempfile::tempdir().unwrap();
    let db_path = index.path().join("idx").join("hdc.db");

    let cache = Cache::open(CacheConfig::new(blobs.path()).with_db_path(&db_path))
        .await
        .unwrap();
    cache.set("k", b"v", None).await.unwrap();

    assert!(db_path.is_file());
    assert!(!blobs.path().join("cache.db").exists());
}

#[tokio::test]
async fn concurrent_writers_and_purge() {
    let (_dir, cache) = open(|c| c.with_tbd(0.01)).await;

    let mut tasks = Vec::new();
    for i in 0..16u8 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            let key = format!("key-{}", i % 4);
            let payload = vec![i; 12_000];
            cache.set(&key, &payload, None).await.unwrap();
            cache.purge().await.unwrap();
            let got = cache.get(&key).await.unwrap();
            assert!(got.is_some_and(|v| v.len() == 12_000));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(cache.len().await.unwrap(), 4);
    for i in 0..4 {
        assert!(cache.get(format!("key-{i}")).await.unwrap().is_some());
    }
}
