//! Storage layer abstractions for LocalRetrieve.
//!
//! This module provides a trait-based abstraction over the storage engine,
//! allowing different backends to be used (e.g., redb, mock for testing).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                                │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │   StorageEngine     │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                    ▲         ▲                              │
//! │                    │         │                              │
//! │         ┌─────────┴─┐   ┌───┴─────────┐                    │
//! │         │RedbStorage│   │ MockStorage │                    │
//! │         └───────────┘   └─────────────┘                    │
//! │           (prod)           (test)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod redb;
pub mod schema;

pub use self::redb::RedbStorage;
pub use schema::{DatabaseMetadata, SCHEMA_VERSION};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::config::Config;
use crate::document::{Document, DocumentUpdate};
use crate::error::Result;
use crate::types::{CollectionId, DocumentId, Timestamp};

/// A single posting in the FTS inverted index: one document's term frequency.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PostingsList {
    /// `(document_id, term_frequency)` pairs for this term, unsorted.
    pub postings: Vec<(String, u32)>,
}

/// Lifecycle state of an embedding-queue row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Waiting to be picked up by `process_queue`.
    Pending,
    /// Claimed by a worker; being embedded.
    Processing,
    /// Embedding succeeded and the vector has been written.
    Completed,
    /// Embedding failed; `attempts` was incremented.
    Failed,
}

/// A durable row in the embedding generation queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueItem {
    pub collection_id: CollectionId,
    pub document_id: DocumentId,
    pub priority: i32,
    pub status: QueueStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A cached value in the primary-database ("sql") cache tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub tags: Vec<String>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Storage engine trait for LocalRetrieve.
///
/// This trait defines the contract that any storage backend must implement.
/// The primary implementation is [`RedbStorage`], but other implementations
/// can be created for testing or alternative backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow the database to be shared
/// across threads. The engine handles internal synchronization.
///
/// # Example
///
/// ```rust,ignore
/// use localretrieve::storage::{StorageEngine, RedbStorage};
///
/// let storage = RedbStorage::open("./retrieve.db", &config)?;
/// let metadata = storage.metadata();
/// println!("Schema version: {}", metadata.schema_version);
/// ```
pub trait StorageEngine: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Returns the database metadata.
    fn metadata(&self) -> &DatabaseMetadata;

    /// Closes the storage engine, flushing any pending writes.
    ///
    /// This method consumes the storage engine. After calling `close()`,
    /// the engine cannot be used.
    fn close(self: Box<Self>) -> Result<()>;

    /// Returns the path to the database file, if applicable.
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Collection Storage Operations
    // =========================================================================

    /// Saves a collection to storage. Overwrites an existing row with the same ID.
    fn save_collection(&self, collection: &Collection) -> Result<()>;

    /// Retrieves a collection by ID. Returns `None` if not found.
    fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>>;

    /// Retrieves a collection by its unique name. Returns `None` if not found.
    fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>>;

    /// Lists all collections in the database.
    fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Deletes a collection by ID. Returns `true` if it existed.
    ///
    /// Does not cascade; callers must first call
    /// [`StorageEngine::delete_documents_by_collection`] and clear the
    /// collection's FTS/queue/cache rows.
    fn delete_collection(&self, id: CollectionId) -> Result<bool>;

    // =========================================================================
    // Document Index Operations (for collection stats & cascade delete)
    // =========================================================================

    /// Counts documents belonging to a collection.
    fn count_documents_in_collection(&self, id: CollectionId) -> Result<u64>;

    /// Deletes all documents, embeddings, and index entries for a collection.
    ///
    /// Returns the number of documents deleted.
    fn delete_documents_by_collection(&self, id: CollectionId) -> Result<u64>;

    /// Lists all document IDs belonging to a collection.
    ///
    /// Used to rebuild HNSW indexes from redb embeddings on startup.
    fn list_document_ids_in_collection(&self, id: CollectionId) -> Result<Vec<DocumentId>>;

    /// Retrieves the most recent document IDs in a collection, newest first.
    fn get_recent_document_ids(
        &self,
        collection_id: CollectionId,
        limit: usize,
    ) -> Result<Vec<(DocumentId, Timestamp)>>;

    /// Lists every `(document_id, embedding)` pair in a collection.
    ///
    /// Used to rebuild the HNSW graph on `Engine::open()`, since stored
    /// embeddings are the source of truth for the derived vector index.
    fn list_embeddings_in_collection(
        &self,
        id: CollectionId,
    ) -> Result<Vec<(DocumentId, Vec<f32>)>>;

    // =========================================================================
    // Document Storage Operations
    // =========================================================================

    /// Saves a document and its embedding to storage.
    ///
    /// Writes atomically in a single transaction:
    /// - `DOCUMENTS_TABLE` — the document record (without embedding)
    /// - `EMBEDDINGS_TABLE` — the embedding vector as raw f32 bytes, if present
    /// - `DOCUMENTS_BY_COLLECTION_TABLE` — secondary index by collection+timestamp
    fn save_document(&self, document: &Document) -> Result<()>;

    /// Saves many documents in a single write transaction: either every
    /// document lands or, on error, none do. Does not touch the FTS index or
    /// embedding queue; callers index/enqueue each document afterward the
    /// same way [`StorageEngine::save_document`] callers do.
    fn bulk_insert(&self, documents: &[Document]) -> Result<u64>;

    /// Retrieves a document by ID within a collection, including its embedding.
    fn get_document(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
    ) -> Result<Option<Document>>;

    /// Updates mutable fields of a document (title, metadata merge).
    ///
    /// Content and embedding are immutable; returns `true` if found and updated.
    fn update_document(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        update: &DocumentUpdate,
    ) -> Result<bool>;

    /// Permanently deletes a document and its embedding, returns `true` if found.
    fn delete_document(&self, collection_id: CollectionId, id: &DocumentId) -> Result<bool>;

    /// Saves an embedding vector to storage as raw little-endian f32 bytes.
    fn save_embedding(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        embedding: &[f32],
    ) -> Result<()>;

    /// Retrieves an embedding vector by document ID. Returns `None` if absent.
    fn get_embedding(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
    ) -> Result<Option<Vec<f32>>>;

    // =========================================================================
    // Full-Text Index Operations
    // =========================================================================

    /// Replaces the FTS postings contributed by one document.
    ///
    /// Removes the document's previous postings (looked up via
    /// `FTS_DOC_TERMS_TABLE`) before writing the new `term -> frequency` map,
    /// then updates `FTS_DOC_LEN_TABLE` and `FTS_DOC_TERMS_TABLE`. All in one
    /// transaction, so a reindex can never leave stale postings behind.
    fn index_document_terms(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        term_frequencies: &[(String, u32)],
        token_count: u32,
    ) -> Result<()>;

    /// Removes all FTS postings contributed by a document.
    fn remove_document_terms(&self, collection_id: CollectionId, id: &DocumentId) -> Result<()>;

    /// Returns the postings list for a term within a collection.
    fn get_postings(&self, collection_id: CollectionId, term: &str) -> Result<PostingsList>;

    /// Returns `(total_documents, total_tokens)` for BM25's average document length.
    fn fts_corpus_stats(&self, collection_id: CollectionId) -> Result<(u64, u64)>;

    /// Returns the token count recorded for one document, if it has been indexed.
    fn document_length(&self, collection_id: CollectionId, id: &DocumentId) -> Result<Option<u32>>;

    /// Returns every `(term, postings)` pair in a collection whose term
    /// starts with `prefix`, for prefix/fuzzy query expansion.
    fn get_postings_by_prefix(
        &self,
        collection_id: CollectionId,
        prefix: &str,
    ) -> Result<Vec<(String, PostingsList)>>;

    // =========================================================================
    // Embedding Queue Operations
    // =========================================================================

    /// Inserts or replaces a queue row, keyed by `(collection_id, document_id)`.
    fn enqueue_embedding(&self, item: &QueueItem) -> Result<()>;

    /// Claims up to `limit` pending rows for a collection, ordered by
    /// priority descending then `created_at` ascending, and flips each to
    /// `Processing` in the same transaction as the claim (a single
    /// read-modify-write per row, not a separate exec-then-select pass).
    fn claim_pending_embeddings(
        &self,
        collection_id: CollectionId,
        limit: usize,
    ) -> Result<Vec<QueueItem>>;

    /// Marks a queue row completed.
    fn complete_embedding(&self, collection_id: CollectionId, id: &DocumentId) -> Result<()>;

    /// Writes a generated embedding and flips its queue row to `Completed`
    /// in one transaction, so a crash between the two never leaves a row
    /// marked complete without its vector (or a vector without a completed
    /// row — a retry would simply overwrite it).
    fn complete_embedding_with_vector(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        embedding: &[f32],
    ) -> Result<()>;

    /// Marks a queue row failed, recording the error and incrementing `attempts`.
    fn fail_embedding(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        error: &str,
    ) -> Result<()>;

    /// Returns counts per [`QueueStatus`] for a collection.
    fn queue_status_counts(&self, collection_id: CollectionId) -> Result<[u64; 4]>;

    /// Deletes queue rows for a collection matching `status`, or all rows
    /// if `status` is `None`. Returns the count removed.
    fn clear_queue(
        &self,
        collection_id: CollectionId,
        status: Option<QueueStatus>,
    ) -> Result<u64>;

    /// Flips every `Processing` row in a collection back to `Pending`,
    /// preserving `attempts`. Returns the count requeued.
    ///
    /// Used at startup to recover rows claimed but never completed or
    /// failed because the process crashed mid-embed.
    fn requeue_processing(&self, collection_id: CollectionId) -> Result<u64>;

    // =========================================================================
    // SQL Cache Tier Operations (tier 3 of the cache coordinator)
    // =========================================================================

    /// Reads a cache entry, ignoring (but not deleting) expired rows.
    fn cache_get(&self, collection_id: CollectionId, key: &str) -> Result<Option<CacheEntry>>;

    /// Writes (or overwrites) a cache entry.
    fn cache_set(&self, collection_id: CollectionId, key: &str, entry: &CacheEntry) -> Result<()>;

    /// Deletes a single cache entry.
    fn cache_delete(&self, collection_id: CollectionId, key: &str) -> Result<()>;

    /// Deletes every cache entry for a collection whose key starts with
    /// `prefix`, or every entry if `prefix` is empty.
    fn cache_invalidate_prefix(&self, collection_id: CollectionId, prefix: &str) -> Result<u64>;

    /// Deletes every cache entry for a collection carrying `tag`.
    fn cache_invalidate_tag(&self, collection_id: CollectionId, tag: &str) -> Result<u64>;

    /// Deletes every expired cache entry for a collection. Returns the count removed.
    fn cache_sweep_expired(&self, collection_id: CollectionId) -> Result<u64>;

    // =========================================================================
    // Backup / Restore
    // =========================================================================

    /// Serializes every table's raw rows into a self-contained byte blob,
    /// suitable for writing to a file or transferring to another instance.
    fn export(&self) -> Result<Vec<u8>>;

    /// Restores rows from a blob produced by [`StorageEngine::export`],
    /// merging them into this database (existing rows with the same key are
    /// overwritten; rows absent from the blob are left untouched).
    fn import(&self, data: &[u8]) -> Result<()>;
}

/// Opens a storage engine at the given path.
///
/// This is a convenience function that creates a [`RedbStorage`] instance.
/// For more control, use `RedbStorage::open()` directly.
///
/// # Errors
///
/// Returns an error if:
/// - The database file is corrupted
/// - The database is locked by another process
/// - Schema version doesn't match
/// - Embedding dimension doesn't match (for existing databases)
pub fn open_storage(path: impl AsRef<Path>, config: &Config) -> Result<Box<dyn StorageEngine>> {
    let storage = RedbStorage::open(path, config)?;
    Ok(Box::new(storage))
}
