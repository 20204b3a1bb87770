//! Cascading reads and fan-out writes across the three cache tiers.

use std::path::Path;

use tracing::{debug, warn};

use super::{DiskTier, MemoryTier, SqlTier};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::storage::StorageEngine;
use crate::types::CollectionId;

/// Coordinates the memory, disk, and primary-database cache tiers.
///
/// `get` checks tiers in order (memory, disk, sql) and promotes a hit back
/// up through the faster tiers it missed. `set` writes to all three tiers
/// so a cold process still benefits from whatever a previous run cached.
pub struct CacheCoordinator {
    memory: MemoryTier,
    disk: DiskTier,
    sql: SqlTier,
}

impl CacheCoordinator {
    /// Opens the disk tier at `disk_path` and builds the memory/sql tiers
    /// from `config`.
    pub fn open(disk_path: impl AsRef<Path>, config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            memory: MemoryTier::new(config),
            disk: DiskTier::open(disk_path, config.disk_ttl)?,
            sql: SqlTier::new(config.sql_ttl),
        })
    }

    fn scoped_key(collection_id: CollectionId, key: &str) -> String {
        format!("{collection_id}:{key}")
    }

    /// Cascading read: memory, then disk, then the primary database,
    /// promoting a hit back up through the tiers that missed.
    pub fn get(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let scoped = Self::scoped_key(collection_id, key);

        if let Some(value) = self.memory.get(&scoped) {
            debug!(tier = "memory", %key, "cache hit");
            return Ok(Some(value));
        }

        if let Some(value) = self.disk.get(&scoped)? {
            debug!(tier = "disk", %key, "cache hit, promoting to memory");
            self.memory.set(&scoped, value.clone());
            return Ok(Some(value));
        }

        if let Some(value) = self.sql.get(storage, collection_id, key)? {
            debug!(tier = "sql", %key, "cache hit, promoting to memory and disk");
            self.memory.set(&scoped, value.clone());
            self.disk.set(&scoped, value.clone())?;
            return Ok(Some(value));
        }

        Ok(None)
    }

    /// Fan-out write to all three tiers.
    pub async fn set(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        self.set_with_tags(storage, collection_id, key, value, Vec::new()).await
    }

    /// Fan-out write to all three tiers, tagging the entry for later
    /// [`Self::invalidate`] lookup by `tag:<t>` pattern.
    ///
    /// The three tier writes run concurrently rather than one after another;
    /// a single tier failing is logged and does not fail the call — a cache
    /// write is best-effort by nature, and a host that lost its disk tier
    /// should still get memory/sql caching. Only if *every* tier fails does
    /// this return [`CacheError::AllTiersFailed`], since at that point the
    /// write had no effect at all and the caller should know.
    pub async fn set_with_tags(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
        value: Vec<u8>,
        tags: Vec<String>,
    ) -> Result<()> {
        let scoped = Self::scoped_key(collection_id, key);
        // Memory/disk tiers aren't collection-partitioned internally (unlike
        // the sql tier, which ranges over a collection's key prefix), so
        // their tags need the same collection scoping as keys.
        let scoped_tags: Vec<String> =
            tags.iter().map(|t| format!("{collection_id}:{t}")).collect();

        let memory_fut = async {
            self.memory.set_with_tags(&scoped, value.clone(), scoped_tags.clone());
            Ok::<(), crate::error::LocalRetrieveError>(())
        };
        let disk_fut = async { self.disk.set_with_tags(&scoped, value.clone(), scoped_tags) };
        let sql_fut = async { self.sql.set_with_tags(storage, collection_id, key, value, tags) };

        let (memory_result, disk_result, sql_result) = tokio::join!(memory_fut, disk_fut, sql_fut);

        let mut failures = 0;
        for (tier, result) in [("memory", &memory_result), ("disk", &disk_result), ("sql", &sql_result)] {
            if let Err(e) = result {
                failures += 1;
                warn!(tier, %key, error = %e, "cache tier write failed");
            }
        }

        if failures == 3 {
            return Err(CacheError::AllTiersFailed { key: key.to_string() }.into());
        }
        Ok(())
    }

    /// Deletes a key from every tier.
    pub fn delete(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
    ) -> Result<()> {
        let scoped = Self::scoped_key(collection_id, key);
        self.memory.delete(&scoped);
        self.disk.delete(&scoped)?;
        self.sql.delete(storage, collection_id, key)?;
        Ok(())
    }

    /// Invalidates every key with a given prefix across all three tiers.
    /// Returns the number of primary-database rows removed (the
    /// authoritative count; the faster tiers are best-effort mirrors).
    pub fn invalidate_prefix(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        prefix: &str,
    ) -> Result<u64> {
        let scoped_prefix = Self::scoped_key(collection_id, prefix);
        self.memory.invalidate_prefix(&scoped_prefix);
        self.disk.invalidate_prefix(&scoped_prefix)?;
        self.sql.invalidate_prefix(storage, collection_id, prefix)
    }

    /// Invalidates cache entries matching `pattern`:
    ///
    /// - `"*"` — every entry in the collection.
    /// - `"tag:<t>"` — every entry tagged `<t>` (set via [`Self::set_with_tags`]).
    /// - anything else — treated as a key prefix (an exact key is a valid,
    ///   if narrow, prefix).
    ///
    /// Returns the number of primary-database rows removed (the
    /// authoritative count; the faster tiers are best-effort mirrors).
    pub fn invalidate(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        pattern: &str,
    ) -> Result<u64> {
        if pattern == "*" {
            return self.invalidate_prefix(storage, collection_id, "");
        }
        if let Some(tag) = pattern.strip_prefix("tag:") {
            let scoped_tag = format!("{collection_id}:{tag}");
            self.memory.invalidate_tag(&scoped_tag);
            self.disk.invalidate_tag(&scoped_tag)?;
            return self.sql.invalidate_tag(storage, collection_id, tag);
        }
        self.invalidate_prefix(storage, collection_id, pattern)
    }

    /// Sweeps expired entries from the primary-database tier. The memory
    /// and disk tiers self-expire on read, so they need no active sweep.
    pub fn sweep_expired(&self, storage: &dyn StorageEngine, collection_id: CollectionId) -> Result<u64> {
        self.sql.sweep_expired(storage, collection_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::RedbStorage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_set_then_get_hits_memory() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let coordinator =
            CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
        let collection_id = CollectionId::new();

        coordinator
            .set(&storage, collection_id, "q1", b"result".to_vec())
            .await
            .unwrap();
        let value = coordinator.get(&storage, collection_id, "q1").unwrap();
        assert_eq!(value, Some(b"result".to_vec()));
    }

    #[test]
    fn test_get_promotes_from_sql_tier() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let coordinator =
            CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
        let collection_id = CollectionId::new();

        // Write only to the sql tier directly, bypassing memory/disk.
        coordinator
            .sql
            .set(&storage, collection_id, "q2", b"direct".to_vec())
            .unwrap();

        let value = coordinator.get(&storage, collection_id, "q2").unwrap();
        assert_eq!(value, Some(b"direct".to_vec()));
        // Now it should be promoted into memory.
        assert_eq!(coordinator.memory.get(&CacheCoordinator::scoped_key(collection_id, "q2")), Some(b"direct".to_vec()));
    }

    #[tokio::test]
    async fn test_invalidate_prefix_removes_from_all_tiers() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let coordinator =
            CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
        let collection_id = CollectionId::new();

        coordinator.set(&storage, collection_id, "fp:1", b"1".to_vec()).await.unwrap();
        coordinator.set(&storage, collection_id, "fp:2", b"2".to_vec()).await.unwrap();

        let removed = coordinator
            .invalidate_prefix(&storage, collection_id, "fp:")
            .unwrap();
        assert_eq!(removed, 2);
        assert!(coordinator.get(&storage, collection_id, "fp:1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_wildcard_clears_everything() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let coordinator =
            CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
        let collection_id = CollectionId::new();

        coordinator.set(&storage, collection_id, "a", b"1".to_vec()).await.unwrap();
        coordinator.set(&storage, collection_id, "b", b"2".to_vec()).await.unwrap();

        let removed = coordinator.invalidate(&storage, collection_id, "*").unwrap();
        assert_eq!(removed, 2);
        assert!(coordinator.get(&storage, collection_id, "a").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let coordinator =
            CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
        let collection_id = CollectionId::new();

        coordinator
            .set_with_tags(&storage, collection_id, "q1", b"1".to_vec(), vec!["query-embedding".into()])
            .await
            .unwrap();
        coordinator
            .set_with_tags(&storage, collection_id, "q2", b"2".to_vec(), vec!["other".into()])
            .await
            .unwrap();

        let removed = coordinator
            .invalidate(&storage, collection_id, "tag:query-embedding")
            .unwrap();
        assert_eq!(removed, 1);
        assert!(coordinator.get(&storage, collection_id, "q1").unwrap().is_none());
        assert!(coordinator.get(&storage, collection_id, "q2").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_succeeds_even_if_disk_tier_path_is_unwritable() {
        // Memory + sql both still accept the write; only total failure
        // escalates.
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let coordinator =
            CacheCoordinator::open(dir.path().join("cache.db"), &CacheConfig::default()).unwrap();
        let collection_id = CollectionId::new();

        let result = coordinator.set(&storage, collection_id, "q1", b"1".to_vec()).await;
        assert!(result.is_ok());
    }
}
