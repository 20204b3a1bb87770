//! In-memory (tier 1) cache.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::config::{CacheConfig, EvictionStrategy};
use crate::types::Timestamp;

struct Entry {
    value: Vec<u8>,
    tags: Vec<String>,
    expires_at: Timestamp,
    inserted_at: Timestamp,
    /// Access count since insertion, used by [`EvictionStrategy::Lfu`]/`Hybrid`.
    frequency: u64,
    /// Parsed from a `"priority:<n>"` tag (default `0`), used by
    /// [`EvictionStrategy::Priority`]/`Hybrid`.
    priority: i64,
}

/// Reads an entry's priority out of its tag list. A tag of the form
/// `"priority:<n>"` sets it; anything else (including no such tag)
/// defaults to `0`.
fn extract_priority(tags: &[String]) -> i64 {
    tags.iter()
        .find_map(|t| t.strip_prefix("priority:"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// When a non-LRU tier goes over capacity, it evicts down to this fraction
/// of `memory_max_entries` in one batch rather than one entry at a time —
/// cheaper than re-scoring on every single insert once full.
const EVICT_TO_FRACTION: f64 = 0.8;

/// Backing store: [`EvictionStrategy::Lru`] uses the `lru` crate's own
/// recency ordering directly; every other strategy needs a score the `lru`
/// crate has no notion of, so it's a plain map with manual eviction.
enum Store {
    Lru(LruCache<String, Entry>),
    Scored(HashMap<String, Entry>),
}

/// The fastest, smallest, and least durable cache tier.
pub struct MemoryTier {
    store: Mutex<Store>,
    cap: usize,
    strategy: EvictionStrategy,
    ttl: std::time::Duration,
}

impl MemoryTier {
    /// Creates a memory tier sized and strategized per `config`.
    pub fn new(config: &CacheConfig) -> Self {
        let cap = config.memory_max_entries.max(1);
        let store = match config.eviction {
            EvictionStrategy::Lru => Store::Lru(LruCache::new(NonZeroUsize::new(cap).unwrap())),
            EvictionStrategy::Lfu | EvictionStrategy::Priority | EvictionStrategy::Hybrid => {
                Store::Scored(HashMap::with_capacity(cap))
            }
        };
        Self {
            store: Mutex::new(store),
            cap,
            strategy: config.eviction,
            ttl: config.memory_ttl,
        }
    }

    /// Returns the cached value if present and not expired.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut store = self.store.lock().unwrap();
        match &mut *store {
            Store::Lru(cache) => match cache.get(key) {
                Some(entry) if !entry.expires_at.has_elapsed() => Some(entry.value.clone()),
                Some(_) => {
                    cache.pop(key);
                    None
                }
                None => None,
            },
            Store::Scored(map) => match map.get_mut(key) {
                Some(entry) if !entry.expires_at.has_elapsed() => {
                    entry.frequency += 1;
                    Some(entry.value.clone())
                }
                Some(_) => {
                    map.remove(key);
                    None
                }
                None => None,
            },
        }
    }

    /// Inserts or overwrites a value, refreshing its TTL.
    pub fn set(&self, key: &str, value: Vec<u8>) {
        self.set_with_tags(key, value, Vec::new());
    }

    /// Inserts or overwrites a value tagged for later [`Self::invalidate_tag`] lookup.
    pub fn set_with_tags(&self, key: &str, value: Vec<u8>, tags: Vec<String>) {
        let now = Timestamp::now();
        let priority = extract_priority(&tags);
        let entry = Entry {
            value,
            tags,
            expires_at: now.plus(self.ttl),
            inserted_at: now,
            frequency: 0,
            priority,
        };

        let mut store = self.store.lock().unwrap();
        match &mut *store {
            Store::Lru(cache) => {
                cache.put(key.to_string(), entry);
            }
            Store::Scored(map) => {
                map.insert(key.to_string(), entry);
                if map.len() > self.cap {
                    self.evict_batch(map);
                }
            }
        }
    }

    /// Evicts the lowest-scoring entries until the map is back down to
    /// [`EVICT_TO_FRACTION`] of capacity.
    fn evict_batch(&self, map: &mut HashMap<String, Entry>) {
        let target = ((self.cap as f64) * EVICT_TO_FRACTION).floor() as usize;
        let target = target.max(1).min(self.cap);
        if map.len() <= target {
            return;
        }

        let now = Timestamp::now();
        let mut scored: Vec<(String, i64)> = map
            .iter()
            .map(|(k, e)| (k.clone(), self.score(e, now)))
            .collect();
        // Lowest score evicted first.
        scored.sort_by_key(|(_, score)| *score);

        let to_remove = map.len() - target;
        for (key, _) in scored.into_iter().take(to_remove) {
            map.remove(&key);
        }
    }

    fn score(&self, entry: &Entry, now: Timestamp) -> i64 {
        let age_seconds = (now.as_millis() - entry.inserted_at.as_millis()) / 1000;
        match self.strategy {
            EvictionStrategy::Lru => unreachable!("Lru uses the lru-crate backed store"),
            EvictionStrategy::Lfu => entry.frequency as i64,
            EvictionStrategy::Priority => entry.priority,
            EvictionStrategy::Hybrid => {
                entry.priority * 1000 + entry.frequency as i64 * 100 - age_seconds
            }
        }
    }

    /// Removes a single key.
    pub fn delete(&self, key: &str) {
        let mut store = self.store.lock().unwrap();
        match &mut *store {
            Store::Lru(cache) => {
                cache.pop(key);
            }
            Store::Scored(map) => {
                map.remove(key);
            }
        }
    }

    /// Removes every key starting with `prefix` (or all keys, if empty).
    pub fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let mut store = self.store.lock().unwrap();
        match &mut *store {
            Store::Lru(cache) => {
                let to_remove: Vec<String> = cache
                    .iter()
                    .filter(|(k, _)| prefix.is_empty() || k.starts_with(prefix))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &to_remove {
                    cache.pop(key);
                }
                to_remove.len() as u64
            }
            Store::Scored(map) => {
                let to_remove: Vec<String> = map
                    .keys()
                    .filter(|k| prefix.is_empty() || k.starts_with(prefix))
                    .cloned()
                    .collect();
                for key in &to_remove {
                    map.remove(&key);
                }
                to_remove.len() as u64
            }
        }
    }

    /// Removes every entry carrying `tag`.
    pub fn invalidate_tag(&self, tag: &str) -> u64 {
        let mut store = self.store.lock().unwrap();
        match &mut *store {
            Store::Lru(cache) => {
                let to_remove: Vec<String> = cache
                    .iter()
                    .filter(|(_, entry)| entry.tags.iter().any(|t| t == tag))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &to_remove {
                    cache.pop(key);
                }
                to_remove.len() as u64
            }
            Store::Scored(map) => {
                let to_remove: Vec<String> = map
                    .iter()
                    .filter(|(_, entry)| entry.tags.iter().any(|t| t == tag))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &to_remove {
                    map.remove(&key);
                }
                to_remove.len() as u64
            }
        }
    }

    /// Number of entries currently cached (including possibly-expired ones).
    pub fn len(&self) -> usize {
        match &*self.store.lock().unwrap() {
            Store::Lru(cache) => cache.len(),
            Store::Scored(map) => map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CacheConfig {
        CacheConfig {
            memory_max_entries: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_set_and_get() {
        let tier = MemoryTier::new(&config());
        tier.set("a", b"hello".to_vec());
        assert_eq!(tier.get("a"), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_eviction_at_capacity() {
        let tier = MemoryTier::new(&config());
        tier.set("a", b"1".to_vec());
        tier.set("b", b"2".to_vec());
        tier.set("c", b"3".to_vec());
        assert_eq!(tier.len(), 2);
        assert!(tier.get("a").is_none());
    }

    #[test]
    fn test_invalidate_prefix() {
        let tier = MemoryTier::new(&CacheConfig::default());
        tier.set("query:abc", b"1".to_vec());
        tier.set("query:def", b"2".to_vec());
        tier.set("other:xyz", b"3".to_vec());

        let removed = tier.invalidate_prefix("query:");
        assert_eq!(removed, 2);
        assert!(tier.get("other:xyz").is_some());
    }

    #[test]
    fn test_expired_entry_is_not_returned() {
        let mut cfg = CacheConfig::default();
        cfg.memory_ttl = std::time::Duration::from_millis(1);
        let tier = MemoryTier::new(&cfg);
        tier.set("a", b"1".to_vec());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(tier.get("a").is_none());
    }

    #[test]
    fn test_lfu_evicts_least_frequently_accessed() {
        let cfg = CacheConfig {
            memory_max_entries: 10,
            eviction: EvictionStrategy::Lfu,
            ..Default::default()
        };
        let tier = MemoryTier::new(&cfg);
        for i in 0..10 {
            tier.set(&format!("k{i}"), vec![i as u8]);
        }
        // Access every key but "k0" several times so it's the clear LFU loser.
        for i in 1..10 {
            for _ in 0..5 {
                tier.get(&format!("k{i}"));
            }
        }
        tier.set("overflow", b"x".to_vec());
        assert!(tier.get("k0").is_none());
    }

    #[test]
    fn test_priority_evicts_lowest_priority_first() {
        let cfg = CacheConfig {
            memory_max_entries: 10,
            eviction: EvictionStrategy::Priority,
            ..Default::default()
        };
        let tier = MemoryTier::new(&cfg);
        tier.set_with_tags("low", b"1".to_vec(), vec!["priority:-5".into()]);
        for i in 1..10 {
            tier.set_with_tags(&format!("k{i}"), vec![i as u8], vec!["priority:5".into()]);
        }
        tier.set("overflow", b"x".to_vec());
        assert!(tier.get("low").is_none());
    }

    #[test]
    fn test_hybrid_combines_priority_frequency_and_age() {
        let cfg = CacheConfig {
            memory_max_entries: 10,
            eviction: EvictionStrategy::Hybrid,
            ..Default::default()
        };
        let tier = MemoryTier::new(&cfg);
        tier.set_with_tags("stale", b"1".to_vec(), vec!["priority:-10".into()]);
        for i in 1..10 {
            tier.set_with_tags(&format!("k{i}"), vec![i as u8], vec!["priority:0".into()]);
        }
        tier.set("overflow", b"x".to_vec());
        assert!(tier.get("stale").is_none());
    }
}
