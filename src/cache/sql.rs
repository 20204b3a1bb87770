//! Primary-database (tier 3) cache: the slowest but most durable tier,
//! riding on the storage engine's own `cache_*` operations so it shares
//! the primary database's transaction and backup story.

use crate::error::Result;
use crate::storage::{CacheEntry, StorageEngine};
use crate::types::{CollectionId, Timestamp};

/// Thin wrapper translating cache semantics onto `StorageEngine::cache_*`.
///
/// Holds no state of its own — every call goes straight through to the
/// storage engine passed in, which is always the engine's own primary
/// database handle.
pub struct SqlTier {
    ttl: std::time::Duration,
}

impl SqlTier {
    /// Creates a tier-3 wrapper using the configured SQL-tier TTL.
    pub fn new(ttl: std::time::Duration) -> Self {
        Self { ttl }
    }

    /// Reads a cache entry's value, if present and unexpired.
    pub fn get(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        Ok(storage
            .cache_get(collection_id, key)?
            .map(|entry| entry.value))
    }

    /// Writes a value with no tags.
    pub fn set(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        self.set_with_tags(storage, collection_id, key, value, Vec::new())
    }

    /// Writes a value, tagging it for later [`Self::invalidate_tag`] lookup.
    pub fn set_with_tags(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
        value: Vec<u8>,
        tags: Vec<String>,
    ) -> Result<()> {
        let entry = CacheEntry {
            value,
            tags,
            created_at: Timestamp::now(),
            expires_at: Timestamp::now().plus(self.ttl),
        };
        storage.cache_set(collection_id, key, &entry)
    }

    /// Deletes a single entry.
    pub fn delete(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        key: &str,
    ) -> Result<()> {
        storage.cache_delete(collection_id, key)
    }

    /// Deletes every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        prefix: &str,
    ) -> Result<u64> {
        storage.cache_invalidate_prefix(collection_id, prefix)
    }

    /// Deletes every entry carrying `tag`.
    pub fn invalidate_tag(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        tag: &str,
    ) -> Result<u64> {
        storage.cache_invalidate_tag(collection_id, tag)
    }

    /// Sweeps expired rows for a collection.
    pub fn sweep_expired(
        &self,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
    ) -> Result<u64> {
        storage.cache_sweep_expired(collection_id)
    }
}
