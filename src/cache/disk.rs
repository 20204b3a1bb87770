//! On-disk (tier 2) cache: a small, dedicated redb file separate from the
//! primary database. Survives process restarts without touching the main
//! database's write path.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};
use crate::types::Timestamp;

const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("disk_cache");

#[derive(Serialize, Deserialize)]
struct Record {
    value: Vec<u8>,
    tags: Vec<String>,
    expires_at: Timestamp,
}

/// The second cache tier: durable but local-disk-only.
pub struct DiskTier {
    db: Database,
    ttl: std::time::Duration,
    #[allow(dead_code)]
    path: PathBuf,
}

impl DiskTier {
    /// Opens (creating if necessary) the dedicated cache database at `path`.
    pub fn open(path: impl AsRef<Path>, ttl: std::time::Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(|e| StorageError::Redb(e.to_string()))?;

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            let _ = write_txn.open_table(CACHE_TABLE)?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        Ok(Self { db, ttl, path })
    }

    /// Returns the cached value if present and not expired.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(CACHE_TABLE)?;
        let Some(guard) = table.get(key).map_err(StorageError::from)? else {
            return Ok(None);
        };
        let record: Record = bincode::deserialize(guard.value())
            .map_err(|e| StorageError::corrupted(format!("Invalid disk cache record: {}", e)))?;
        if record.expires_at.has_elapsed() {
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    /// Inserts or overwrites a value, refreshing its TTL.
    pub fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.set_with_tags(key, value, Vec::new())
    }

    /// Inserts or overwrites a value tagged for later [`Self::invalidate_tag`] lookup.
    pub fn set_with_tags(&self, key: &str, value: Vec<u8>, tags: Vec<String>) -> Result<()> {
        let record = Record {
            value,
            tags,
            expires_at: Timestamp::now().plus(self.ttl),
        };
        let bytes =
            bincode::serialize(&record).map_err(|e| StorageError::serialization(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Removes a single key.
    pub fn delete(&self, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Removes every key starting with `prefix` (or all keys, if empty).
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<u64> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut removed = 0u64;
        {
            let matching: Vec<String> = {
                let table = write_txn.open_table(CACHE_TABLE)?;
                table
                    .iter()
                    .map_err(StorageError::from)?
                    .filter_map(|e| e.ok())
                    .map(|(k, _)| k.value().to_string())
                    .filter(|k| prefix.is_empty() || k.starts_with(prefix))
                    .collect()
            };
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            for key in &matching {
                if table.remove(key.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(removed)
    }

    /// Removes every entry carrying `tag`.
    pub fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut removed = 0u64;
        {
            let matching: Vec<String> = {
                let table = write_txn.open_table(CACHE_TABLE)?;
                table
                    .iter()
                    .map_err(StorageError::from)?
                    .filter_map(|e| e.ok())
                    .filter_map(|(k, v)| {
                        let record: Record = bincode::deserialize(v.value()).ok()?;
                        record.tags.iter().any(|t| t == tag).then(|| k.value().to_string())
                    })
                    .collect()
            };
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            for key in &matching {
                if table.remove(key.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_disk_tier_roundtrip() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(dir.path().join("cache.db"), std::time::Duration::from_secs(60))
            .unwrap();

        tier.set("a", b"hello".to_vec()).unwrap();
        assert_eq!(tier.get("a").unwrap(), Some(b"hello".to_vec()));

        tier.delete("a").unwrap();
        assert_eq!(tier.get("a").unwrap(), None);
    }

    #[test]
    fn test_disk_tier_invalidate_prefix() {
        let dir = tempdir().unwrap();
        let tier = DiskTier::open(dir.path().join("cache.db"), std::time::Duration::from_secs(60))
            .unwrap();

        tier.set("q:1", b"1".to_vec()).unwrap();
        tier.set("q:2", b"2".to_vec()).unwrap();
        tier.set("other", b"3".to_vec()).unwrap();

        let removed = tier.invalidate_prefix("q:").unwrap();
        assert_eq!(removed, 2);
        assert!(tier.get("other").unwrap().is_some());
    }
}
