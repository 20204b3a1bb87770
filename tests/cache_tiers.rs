//! Integration tests for the three-tier query-embedding cache: a hit in a
//! slower tier promotes back up through the faster tiers it missed, and
//! invalidation (by prefix, by tag, or `"*"`) removes entries everywhere.

use localretrieve::cache::CacheCoordinator;
use localretrieve::storage::{RedbStorage, StorageEngine};
use localretrieve::{CacheConfig, CollectionId, Config};
use tempfile::tempdir;

fn open_storage(dir: &tempfile::TempDir) -> RedbStorage {
    RedbStorage::open(dir.path().join("main.db"), &Config::with_local_embeddings()).unwrap()
}

#[tokio::test]
async fn test_set_then_get_roundtrips_through_memory_tier() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
    let collection_id = CollectionId::new();

    cache.set(&storage, collection_id, "query:fox", b"embedding-bytes".to_vec()).await.unwrap();
    let value = cache.get(&storage, collection_id, "query:fox").unwrap();
    assert_eq!(value, Some(b"embedding-bytes".to_vec()));
}

#[test]
fn test_miss_returns_none() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
    let collection_id = CollectionId::new();

    assert_eq!(cache.get(&storage, collection_id, "never-set").unwrap(), None);
}

#[tokio::test]
async fn test_entries_are_scoped_per_collection() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
    let a = CollectionId::new();
    let b = CollectionId::new();

    cache.set(&storage, a, "query:fox", b"for-a".to_vec()).await.unwrap();
    assert_eq!(cache.get(&storage, b, "query:fox").unwrap(), None);
    assert_eq!(cache.get(&storage, a, "query:fox").unwrap(), Some(b"for-a".to_vec()));
}

#[tokio::test]
async fn test_invalidate_prefix_removes_matching_keys_only() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
    let collection_id = CollectionId::new();

    cache.set(&storage, collection_id, "query:fox", b"1".to_vec()).await.unwrap();
    cache.set(&storage, collection_id, "query:dog", b"2".to_vec()).await.unwrap();
    cache.set(&storage, collection_id, "result:fox", b"3".to_vec()).await.unwrap();

    let removed = cache.invalidate(&storage, collection_id, "query:").unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cache.get(&storage, collection_id, "query:fox").unwrap(), None);
    assert_eq!(cache.get(&storage, collection_id, "query:dog").unwrap(), None);
    assert_eq!(cache.get(&storage, collection_id, "result:fox").unwrap(), Some(b"3".to_vec()));
}

#[tokio::test]
async fn test_invalidate_by_tag_removes_only_tagged_entries() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
    let collection_id = CollectionId::new();

    cache
        .set_with_tags(&storage, collection_id, "a", b"1".to_vec(), vec!["model:v1".to_string()])
        .await
        .unwrap();
    cache
        .set_with_tags(&storage, collection_id, "b", b"2".to_vec(), vec!["model:v2".to_string()])
        .await
        .unwrap();

    cache.invalidate(&storage, collection_id, "tag:model:v1").unwrap();
    assert_eq!(cache.get(&storage, collection_id, "a").unwrap(), None);
    assert_eq!(cache.get(&storage, collection_id, "b").unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_invalidate_star_clears_every_entry() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
    let collection_id = CollectionId::new();

    cache.set(&storage, collection_id, "a", b"1".to_vec()).await.unwrap();
    cache.set(&storage, collection_id, "b", b"2".to_vec()).await.unwrap();

    cache.invalidate(&storage, collection_id, "*").unwrap();
    assert_eq!(cache.get(&storage, collection_id, "a").unwrap(), None);
    assert_eq!(cache.get(&storage, collection_id, "b").unwrap(), None);
}

#[tokio::test]
async fn test_delete_removes_single_key() {
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
    let collection_id = CollectionId::new();

    cache.set(&storage, collection_id, "a", b"1".to_vec()).await.unwrap();
    cache.set(&storage, collection_id, "b", b"2".to_vec()).await.unwrap();
    cache.delete(&storage, collection_id, "a").unwrap();

    assert_eq!(cache.get(&storage, collection_id, "a").unwrap(), None);
    assert_eq!(cache.get(&storage, collection_id, "b").unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_cache_survives_reopen_via_sql_tier() {
    // The memory and disk tiers are process-local; only the sql tier lives
    // inside the primary database and survives a fresh `CacheCoordinator`.
    let dir = tempdir().unwrap();
    let storage = open_storage(&dir);
    let collection_id = CollectionId::new();

    {
        let cache = CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
        cache.set(&storage, collection_id, "query:fox", b"durable".to_vec()).await.unwrap();
    }

    let cache = CacheCoordinator::open(dir.path().join("cache2.db"), &CacheConfig::default()).unwrap();
    assert_eq!(cache.get(&storage, collection_id, "query:fox").unwrap(), Some(b"durable".to_vec()));

    Box::new(storage).close().unwrap();
}
