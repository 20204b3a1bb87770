//! Core type definitions for LocalRetrieve identifiers and timestamps.
//!
//! This module defines the fundamental ID types used throughout the engine.
//! All ID types use UUID v7 for time-ordered unique identification.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Collection identifier (UUID v7 for time-ordering).
///
/// A collection is an isolated namespace of documents with one fixed
/// embedding configuration. Each collection has its own FTS index, HNSW
/// vector index, and row of the `collections` registry table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub Uuid);

impl CollectionId {
    /// Creates a new CollectionId with a UUID v7 (time-ordered).
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a nil (all zeros) CollectionId. Useful for testing.
    #[inline]
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns the raw UUID bytes for storage.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Creates a CollectionId from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for CollectionId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document identifier.
///
/// Documents are identified by a caller-supplied string that is unique
/// *within* a collection. Unlike [`CollectionId`] this is not a UUID —
/// hosts frequently want their own primary keys (file paths, row ids from
/// another system) to round-trip unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Creates a new DocumentId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the document ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unix timestamp in milliseconds.
///
/// Using i64 allows representing dates far into the future and past.
/// Millisecond precision is sufficient for query/cache/queue bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    ///
    /// If the system clock is before the Unix epoch (should never happen
    /// in practice), returns a timestamp of 0 (epoch) rather than panicking.
    #[inline]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Creates a timestamp from Unix milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns big-endian bytes for storage (enables lexicographic ordering).
    #[inline]
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Returns a timestamp `duration` in the future.
    pub fn plus(&self, duration: std::time::Duration) -> Self {
        Self(self.0 + duration.as_millis() as i64)
    }

    /// Returns true if this timestamp is at or before `now`.
    pub fn has_elapsed(&self) -> bool {
        *self <= Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Embedding vector type alias.
///
/// Embeddings are f32 vectors of fixed dimension (collection-declared).
pub type Embedding = Vec<f32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_id_new_is_unique() {
        let id1 = CollectionId::new();
        let id2 = CollectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_collection_id_bytes_roundtrip() {
        let id = CollectionId::new();
        let bytes = *id.as_bytes();
        let restored = CollectionId::from_bytes(bytes);
        assert_eq!(id, restored);
    }

    #[test]
    fn test_collection_id_serialization() {
        let id = CollectionId::new();
        let bytes = bincode::serialize(&id).unwrap();
        let restored: CollectionId = bincode::deserialize(&bytes).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn test_document_id_roundtrip() {
        let id = DocumentId::new("doc-1");
        assert_eq!(id.as_str(), "doc-1");
        assert_eq!(format!("{}", id), "doc-1");
    }

    #[test]
    fn test_timestamp_now_monotonic() {
        let t1 = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let t2 = Timestamp::now();
        assert!(t1 < t2);
    }

    #[test]
    fn test_timestamp_be_bytes_order() {
        let t1 = Timestamp::from_millis(100);
        let t2 = Timestamp::from_millis(200);
        assert!(t1.to_be_bytes() < t2.to_be_bytes());
    }

    #[test]
    fn test_timestamp_plus() {
        let t1 = Timestamp::from_millis(1000);
        let t2 = t1.plus(std::time::Duration::from_secs(1));
        assert_eq!(t2.as_millis(), 2000);
    }
}
