//! Database schema definitions and versioning.
//!
//! This module defines the table layout for the redb storage engine. redb
//! requires `'static` table name strings, so "one physical table per
//! collection" (the naive SQL translation) isn't available; instead every
//! table is shared across collections and partitioned by a key prefix of
//! `collection_id` bytes. This is the faithful Rust/redb translation of
//! "tables named predictably from the collection id": logical partitioning
//! without dynamically-named physical tables.
//!
//! # Table Layout
//!
//! ```text
//! METADATA_TABLE             "db_metadata" -> DatabaseMetadata
//! COLLECTIONS_TABLE          collection_id(16) -> Collection
//! DOCUMENTS_TABLE            collection_id(16) ++ doc_id -> Document (no embedding)
//! DOCUMENTS_BY_COLLECTION    collection_id(16) ++ ts_be(8) ++ doc_id -> () (index)
//! EMBEDDINGS_TABLE           collection_id(16) ++ doc_id -> raw f32 LE bytes
//! FTS_POSTINGS_TABLE         collection_id(16) ++ term -> bincode(PostingsList)
//! FTS_DOC_LEN_TABLE          collection_id(16) ++ doc_id -> token count (u32 LE)
//! FTS_DOC_TERMS_TABLE        collection_id(16) ++ doc_id -> bincode(Vec<String>)
//! EMBEDDING_QUEUE_TABLE      collection_id(16) ++ doc_id -> bincode(QueueItem)
//! CACHE_SQL_TABLE            collection_id(16) ++ cache_key -> bincode(CacheEntry)
//! ```

use redb::TableDefinition;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingDimension;
use crate::types::Timestamp;

/// Current schema version.
///
/// The engine refuses to open a database whose stored version doesn't match.
pub const SCHEMA_VERSION: u32 = 1;

/// Maximum content size in bytes (1 MB).
pub const MAX_CONTENT_SIZE: usize = 1024 * 1024;

/// Maximum number of tag/metadata entries per document.
pub const MAX_METADATA_ENTRIES: usize = 64;

/// Maximum length of a single metadata value, in bytes.
pub const MAX_METADATA_VALUE_LENGTH: usize = 4096;

// ============================================================================
// Table Definitions
// ============================================================================

/// Metadata table for database-level information.
pub const METADATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Collections table. Key: collection id bytes (16). Value: bincode Collection.
pub const COLLECTIONS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("collections");

/// Documents table. Key: `collection_id(16) ++ doc_id`. Value: bincode Document sans embedding.
pub const DOCUMENTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("documents");

/// Index: documents by collection and insertion time, for recency queries.
/// Key: `collection_id(16) ++ ts_be(8) ++ doc_id`. Value: empty marker.
pub const DOCUMENTS_BY_COLLECTION_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("documents_by_collection");

/// Embeddings table, kept separate from documents to keep scans over
/// document metadata cheap. Key: `collection_id(16) ++ doc_id`. Value: raw f32 LE bytes.
pub const EMBEDDINGS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("embeddings");

/// Inverted index postings. Key: `collection_id(16) ++ term`. Value: bincode postings list.
pub const FTS_POSTINGS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("fts_postings");

/// Per-document token counts, needed for BM25's average document length.
/// Key: `collection_id(16) ++ doc_id`. Value: u32 LE token count.
pub const FTS_DOC_LEN_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("fts_doc_len");

/// Per-document term list, needed to remove stale postings on update/delete.
/// Key: `collection_id(16) ++ doc_id`. Value: bincode `Vec<String>`.
pub const FTS_DOC_TERMS_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("fts_doc_terms");

/// Durable embedding generation queue. Key: `collection_id(16) ++ doc_id`.
/// Value: bincode `QueueItem`. No in-memory mirror is kept; state lives here only.
pub const EMBEDDING_QUEUE_TABLE: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("embedding_queue");

/// The cache coordinator's third tier (the "owned primary database" tier).
/// Key: `collection_id(16) ++ cache_key`. Value: bincode `CacheEntry`.
pub const CACHE_SQL_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("cache_sql");

// ============================================================================
// Database Metadata
// ============================================================================

/// Database metadata stored in the metadata table under key `"db_metadata"`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// Embedding dimension configured for this database.
    ///
    /// Once set, this cannot be changed without recreating the database.
    pub embedding_dimension: EmbeddingDimension,

    /// Timestamp when the database was created.
    pub created_at: Timestamp,

    /// Last time the database was opened (updated on each open).
    pub last_opened_at: Timestamp,
}

impl DatabaseMetadata {
    /// Creates new metadata for a fresh database.
    pub fn new(embedding_dimension: EmbeddingDimension) -> Self {
        let now = Timestamp::now();
        Self {
            schema_version: SCHEMA_VERSION,
            embedding_dimension,
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Timestamp::now();
    }

    /// Checks if this metadata is compatible with the current schema.
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

// ============================================================================
// Key Encoding Helpers
// ============================================================================

/// Builds the `collection_id ++ doc_id` key shared by documents, embeddings,
/// fts doc-len/doc-terms, and the queue table.
#[inline]
pub fn doc_key(collection_id: &[u8; 16], doc_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + doc_id.len());
    key.extend_from_slice(collection_id);
    key.extend_from_slice(doc_id.as_bytes());
    key
}

/// Builds the `collection_id ++ term` key for the FTS postings table.
#[inline]
pub fn term_key(collection_id: &[u8; 16], term: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + term.len());
    key.extend_from_slice(collection_id);
    key.extend_from_slice(term.as_bytes());
    key
}

/// Builds the `collection_id ++ ts_be ++ doc_id` recency-index key.
#[inline]
pub fn recency_key(collection_id: &[u8; 16], timestamp: Timestamp, doc_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 8 + doc_id.len());
    key.extend_from_slice(collection_id);
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(doc_id.as_bytes());
    key
}

/// Lower bound of the key range covering every row of `collection_id`.
#[inline]
pub fn collection_prefix_start(collection_id: &[u8; 16]) -> Vec<u8> {
    collection_id.to_vec()
}

/// Upper bound (exclusive) of the key range covering every row of `collection_id`.
#[inline]
pub fn collection_prefix_end(collection_id: &[u8; 16]) -> Vec<u8> {
    let mut end = collection_id.to_vec();
    end.push(0xff);
    end
}

/// Upper bound (exclusive) of the `FTS_POSTINGS_TABLE` key range covering
/// every term starting with `prefix` within `collection_id`, for prefix
/// (fuzzy) term lookups.
#[inline]
pub fn term_prefix_end(collection_id: &[u8; 16], prefix: &str) -> Vec<u8> {
    let mut end = term_key(collection_id, prefix);
    end.push(0xff);
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        assert_eq!(SCHEMA_VERSION, 1);
    }

    #[test]
    fn test_database_metadata_new() {
        let meta = DatabaseMetadata::new(EmbeddingDimension::D384);
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert_eq!(meta.embedding_dimension, EmbeddingDimension::D384);
        assert!(meta.is_compatible());
    }

    #[test]
    fn test_database_metadata_touch() {
        let mut meta = DatabaseMetadata::new(EmbeddingDimension::D384);
        let original = meta.last_opened_at;
        std::thread::sleep(std::time::Duration::from_millis(1));
        meta.touch();
        assert!(meta.last_opened_at > original);
    }

    #[test]
    fn test_database_metadata_serialization() {
        let meta = DatabaseMetadata::new(EmbeddingDimension::D768);
        let bytes = bincode::serialize(&meta).unwrap();
        let restored: DatabaseMetadata = bincode::deserialize(&bytes).unwrap();
        assert_eq!(meta.schema_version, restored.schema_version);
        assert_eq!(meta.embedding_dimension, restored.embedding_dimension);
    }

    #[test]
    fn test_doc_key_prefix() {
        let cid = [1u8; 16];
        let key = doc_key(&cid, "doc-1");
        assert_eq!(&key[..16], &cid);
        assert_eq!(&key[16..], b"doc-1");
    }

    #[test]
    fn test_recency_key_ordering() {
        let cid = [1u8; 16];
        let k1 = recency_key(&cid, Timestamp::from_millis(1000), "a");
        let k2 = recency_key(&cid, Timestamp::from_millis(2000), "a");
        assert!(k1 < k2);
    }

    #[test]
    fn test_collection_prefix_range() {
        let cid = [42u8; 16];
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);
        let mid = doc_key(&cid, "anything");
        assert!(start <= mid);
        assert!(mid < end);
    }
}
