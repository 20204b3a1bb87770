//! redb storage engine implementation.
//!
//! This module provides the primary storage backend for LocalRetrieve using
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store.
//!
//! # Features
//!
//! - ACID transactions with MVCC
//! - Single-writer, multiple-reader concurrency
//! - Automatic crash recovery
//! - Zero external dependencies (pure Rust)
//!
//! # File Layout
//!
//! When you open a database at `./retrieve.db`, redb creates:
//! - `./retrieve.db` - Main database file
//! - `./retrieve.db.lock` - Lock file for writer coordination (may not be visible)

use std::path::{Path, PathBuf};

use ::redb::{Database, ReadableTable};
use tracing::{debug, info, instrument, warn};

use super::schema::{
    collection_prefix_end, collection_prefix_start, doc_key, recency_key, term_key,
    term_prefix_end, DatabaseMetadata, CACHE_SQL_TABLE, COLLECTIONS_TABLE,
    DOCUMENTS_BY_COLLECTION_TABLE, DOCUMENTS_TABLE, EMBEDDINGS_TABLE, EMBEDDING_QUEUE_TABLE,
    FTS_DOC_LEN_TABLE, FTS_DOC_TERMS_TABLE, FTS_POSTINGS_TABLE, METADATA_TABLE, SCHEMA_VERSION,
};
use super::{CacheEntry, PostingsList, QueueItem, QueueStatus, StorageEngine};
use crate::collection::Collection;
use crate::config::{Config, EmbeddingDimension};
use crate::document::{Document, DocumentUpdate};
use crate::error::{LocalRetrieveError, Result, StorageError, ValidationError};
use crate::types::{CollectionId, DocumentId, Timestamp};

/// Metadata key in the metadata table.
const METADATA_KEY: &str = "db_metadata";

/// redb storage engine wrapper.
///
/// This struct holds the redb database handle and cached metadata.
/// It implements [`StorageEngine`] for use with the engine.
///
/// # Thread Safety
///
/// `RedbStorage` is `Send + Sync`. redb handles internal synchronization
/// using MVCC for readers and exclusive locking for writers.
#[derive(Debug)]
pub struct RedbStorage {
    /// The redb database handle.
    db: Database,

    /// Cached database metadata.
    metadata: DatabaseMetadata,

    /// Path to the database file.
    path: PathBuf,
}

impl RedbStorage {
    /// Opens or creates a database at the given path.
    ///
    /// If the database doesn't exist, it will be created and initialized
    /// with the configuration settings. If it exists, the configuration
    /// will be validated against the stored metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The database file is corrupted
    /// - The database is locked by another process
    /// - Schema version doesn't match
    /// - Embedding dimension doesn't match (for existing databases)
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use localretrieve::{Config, storage::RedbStorage};
    ///
    /// let storage = RedbStorage::open("./retrieve.db", &Config::default())?;
    /// ```
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let db_exists = path.exists();

        debug!(db_exists = db_exists, "Opening storage engine");

        let db = Self::create_database(path, config)?;

        if db_exists {
            Self::open_existing(db, path.to_path_buf(), config)
        } else {
            Self::initialize_new(db, path.to_path_buf(), config)
        }
    }

    /// Creates the redb database with appropriate settings.
    fn create_database(path: &Path, _config: &Config) -> Result<Database> {
        let builder = Database::builder();

        // Note: redb 2.x doesn't have set_cache_size, it manages memory internally.
        // The cache_size_mb config is accepted for parity with `StoragePragmas`.

        let db = builder.create(path).map_err(|e| {
            if e.to_string().contains("locked") {
                StorageError::DatabaseLocked
            } else {
                StorageError::Redb(e.to_string())
            }
        })?;

        debug!("Database file opened successfully");
        Ok(db)
    }

    /// Initializes a new database with tables and metadata.
    #[instrument(skip(db, config), fields(path = %path.display()))]
    fn initialize_new(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Initializing new database");

        let metadata = DatabaseMetadata::new(config.embedding_dimension);

        let write_txn = db.begin_write().map_err(StorageError::from)?;

        {
            let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
            let metadata_bytes = bincode::serialize(&metadata)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;

            // Tables are created on first access; touching them here keeps
            // a brand-new database file fully self-describing.
            let _ = write_txn.open_table(COLLECTIONS_TABLE)?;
            let _ = write_txn.open_table(DOCUMENTS_TABLE)?;
            let _ = write_txn.open_table(DOCUMENTS_BY_COLLECTION_TABLE)?;
            let _ = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let _ = write_txn.open_table(FTS_POSTINGS_TABLE)?;
            let _ = write_txn.open_table(FTS_DOC_LEN_TABLE)?;
            let _ = write_txn.open_table(FTS_DOC_TERMS_TABLE)?;
            let _ = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
            let _ = write_txn.open_table(CACHE_SQL_TABLE)?;
        }

        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = SCHEMA_VERSION,
            dimension = config.embedding_dimension.size(),
            "Database initialized"
        );

        Ok(Self { db, metadata, path })
    }

    /// Opens and validates an existing database.
    #[instrument(skip(db, config), fields(path = %path.display()))]
    fn open_existing(db: Database, path: PathBuf, config: &Config) -> Result<Self> {
        info!("Opening existing database");

        let read_txn = db.begin_read().map_err(StorageError::from)?;

        let metadata = {
            let meta_table = read_txn.open_table(METADATA_TABLE).map_err(|e| {
                StorageError::corrupted(format!("Cannot open metadata table: {}", e))
            })?;

            let metadata_bytes = meta_table
                .get(METADATA_KEY)
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::corrupted("Missing database metadata"))?;

            bincode::deserialize::<DatabaseMetadata>(metadata_bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {}", e)))?
        };

        drop(read_txn);

        if metadata.schema_version != SCHEMA_VERSION {
            warn!(
                expected = SCHEMA_VERSION,
                found = metadata.schema_version,
                "Schema version mismatch"
            );
            return Err(LocalRetrieveError::Database(
                StorageError::SchemaVersionMismatch {
                    expected: SCHEMA_VERSION,
                    found: metadata.schema_version,
                },
            ));
        }

        if metadata.embedding_dimension != config.embedding_dimension {
            warn!(
                expected = config.embedding_dimension.size(),
                found = metadata.embedding_dimension.size(),
                "Embedding dimension mismatch"
            );
            return Err(LocalRetrieveError::Validation(
                ValidationError::DimensionMismatch {
                    expected: config.embedding_dimension.size(),
                    got: metadata.embedding_dimension.size(),
                },
            ));
        }

        let mut metadata = metadata;
        metadata.touch();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            let mut meta_table = write_txn.open_table(METADATA_TABLE)?;
            let metadata_bytes = bincode::serialize(&metadata)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            meta_table.insert(METADATA_KEY, metadata_bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        info!(
            schema_version = metadata.schema_version,
            dimension = metadata.embedding_dimension.size(),
            "Database opened successfully"
        );

        Ok(Self { db, metadata, path })
    }

    /// Returns a reference to the underlying redb database.
    #[inline]
    pub(crate) fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the embedding dimension configured for this database.
    #[inline]
    pub fn embedding_dimension(&self) -> EmbeddingDimension {
        self.metadata.embedding_dimension
    }
}

/// Encodes an embedding as raw little-endian f32 bytes.
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decodes raw little-endian f32 bytes into an embedding.
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A self-contained dump of every table's raw rows, produced by
/// [`StorageEngine::export`] and consumed by [`StorageEngine::import`].
///
/// Rows are copied verbatim (already-encoded keys and bincode/raw values),
/// so restoring one is just re-inserting each pair — no business-level
/// reconstruction needed, and the dump stays valid across collections.
#[derive(serde::Serialize, serde::Deserialize)]
struct ExportSnapshot {
    schema_version: u32,
    metadata: Vec<(String, Vec<u8>)>,
    collections: Vec<(Vec<u8>, Vec<u8>)>,
    documents: Vec<(Vec<u8>, Vec<u8>)>,
    documents_by_collection: Vec<(Vec<u8>, Vec<u8>)>,
    embeddings: Vec<(Vec<u8>, Vec<u8>)>,
    fts_postings: Vec<(Vec<u8>, Vec<u8>)>,
    fts_doc_len: Vec<(Vec<u8>, Vec<u8>)>,
    fts_doc_terms: Vec<(Vec<u8>, Vec<u8>)>,
    embedding_queue: Vec<(Vec<u8>, Vec<u8>)>,
    cache_sql: Vec<(Vec<u8>, Vec<u8>)>,
}

impl StorageEngine for RedbStorage {
    fn metadata(&self) -> &DatabaseMetadata {
        &self.metadata
    }

    #[instrument(skip(self))]
    fn close(self: Box<Self>) -> Result<()> {
        info!("Closing storage engine");
        drop(self.db);
        info!("Storage engine closed");
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    // =========================================================================
    // Collections
    // =========================================================================

    fn save_collection(&self, collection: &Collection) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(COLLECTIONS_TABLE)?;
            let bytes = bincode::serialize(collection)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            table.insert(collection.id.as_bytes().as_slice(), bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(COLLECTIONS_TABLE)?;
        let Some(guard) = table.get(id.as_bytes().as_slice()).map_err(StorageError::from)? else {
            return Ok(None);
        };
        let collection: Collection = bincode::deserialize(guard.value())
            .map_err(|e| StorageError::corrupted(format!("Invalid collection record: {}", e)))?;
        Ok(Some(collection))
    }

    fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(COLLECTIONS_TABLE)?;
        for entry in table.iter().map_err(StorageError::from)? {
            let (_, v) = entry.map_err(StorageError::from)?;
            let collection: Collection = bincode::deserialize(v.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid collection record: {}", e)))?;
            if collection.name == name {
                return Ok(Some(collection));
            }
        }
        Ok(None)
    }

    fn list_collections(&self) -> Result<Vec<Collection>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(COLLECTIONS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(StorageError::from)? {
            let (_, v) = entry.map_err(StorageError::from)?;
            let collection: Collection = bincode::deserialize(v.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid collection record: {}", e)))?;
            out.push(collection);
        }
        Ok(out)
    }

    fn delete_collection(&self, id: CollectionId) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let existed = {
            let mut table = write_txn.open_table(COLLECTIONS_TABLE)?;
            table.remove(id.as_bytes().as_slice())?.is_some()
        };
        write_txn.commit().map_err(StorageError::from)?;
        Ok(existed)
    }

    // =========================================================================
    // Document index operations
    // =========================================================================

    fn count_documents_in_collection(&self, id: CollectionId) -> Result<u64> {
        let cid = *id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        let mut count = 0u64;
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
        {
            entry.map_err(StorageError::from)?;
            count += 1;
        }
        Ok(count)
    }

    fn delete_documents_by_collection(&self, id: CollectionId) -> Result<u64> {
        let cid = *id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut deleted = 0u64;
        {
            let keys: Vec<Vec<u8>> = {
                let table = write_txn.open_table(DOCUMENTS_TABLE)?;
                table
                    .range(start.as_slice()..end.as_slice())
                    .map_err(StorageError::from)?
                    .map(|e| e.map(|(k, _)| k.value().to_vec()))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(StorageError::from)?
            };

            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let mut by_collection = write_txn.open_table(DOCUMENTS_BY_COLLECTION_TABLE)?;

            for key in &keys {
                if let Some(guard) = documents.remove(key.as_slice())? {
                    let doc: Document = bincode::deserialize(guard.value()).map_err(|e| {
                        StorageError::corrupted(format!("Invalid document record: {}", e))
                    })?;
                    let rkey = recency_key(&cid, doc.timestamp, doc.id.as_str());
                    by_collection.remove(rkey.as_slice())?;
                    embeddings.remove(key.as_slice())?;
                    deleted += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(deleted)
    }

    fn list_document_ids_in_collection(&self, id: CollectionId) -> Result<Vec<DocumentId>> {
        let cid = *id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_TABLE)?;
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
        {
            let (k, _) = entry.map_err(StorageError::from)?;
            let key = k.value();
            let doc_id = String::from_utf8_lossy(&key[16..]).into_owned();
            out.push(DocumentId::new(doc_id));
        }
        Ok(out)
    }

    fn get_recent_document_ids(
        &self,
        collection_id: CollectionId,
        limit: usize,
    ) -> Result<Vec<(DocumentId, Timestamp)>> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(DOCUMENTS_BY_COLLECTION_TABLE)?;
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
            .rev()
        {
            if out.len() >= limit {
                break;
            }
            let (k, _) = entry.map_err(StorageError::from)?;
            let key = k.value();
            let ts_bytes: [u8; 8] = key[16..24].try_into().unwrap();
            let ts = Timestamp::from_millis(i64::from_be_bytes(ts_bytes));
            let doc_id = String::from_utf8_lossy(&key[24..]).into_owned();
            out.push((DocumentId::new(doc_id), ts));
        }
        Ok(out)
    }

    fn list_embeddings_in_collection(
        &self,
        id: CollectionId,
    ) -> Result<Vec<(DocumentId, Vec<f32>)>> {
        let cid = *id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(EMBEDDINGS_TABLE)?;
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
        {
            let (k, v) = entry.map_err(StorageError::from)?;
            let key = k.value();
            let doc_id = String::from_utf8_lossy(&key[16..]).into_owned();
            out.push((DocumentId::new(doc_id), decode_embedding(v.value())));
        }
        Ok(out)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    fn save_document(&self, document: &Document) -> Result<()> {
        let cid = *document.collection_id.as_bytes();
        let key = doc_key(&cid, document.id.as_str());

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut by_collection = write_txn.open_table(DOCUMENTS_BY_COLLECTION_TABLE)?;
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;

            if let Some(old) = documents.get(key.as_slice()).map_err(StorageError::from)? {
                let old_doc: Document = bincode::deserialize(old.value()).map_err(|e| {
                    StorageError::corrupted(format!("Invalid document record: {}", e))
                })?;
                let old_rkey = recency_key(&cid, old_doc.timestamp, old_doc.id.as_str());
                by_collection.remove(old_rkey.as_slice())?;
            }

            let bytes = bincode::serialize(document)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            documents.insert(key.as_slice(), bytes.as_slice())?;

            if !document.embedding.is_empty() {
                let emb_bytes = encode_embedding(&document.embedding);
                embeddings.insert(key.as_slice(), emb_bytes.as_slice())?;
            }

            let rkey = recency_key(&cid, document.timestamp, document.id.as_str());
            by_collection.insert(rkey.as_slice(), &[][..])?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    fn bulk_insert(&self, documents: &[Document]) -> Result<u64> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut by_collection = write_txn.open_table(DOCUMENTS_BY_COLLECTION_TABLE)?;
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;

            for document in documents {
                let cid = *document.collection_id.as_bytes();
                let key = doc_key(&cid, document.id.as_str());

                if let Some(old) = table.get(key.as_slice()).map_err(StorageError::from)? {
                    let old_doc: Document = bincode::deserialize(old.value()).map_err(|e| {
                        StorageError::corrupted(format!("Invalid document record: {}", e))
                    })?;
                    let old_rkey = recency_key(&cid, old_doc.timestamp, old_doc.id.as_str());
                    by_collection.remove(old_rkey.as_slice())?;
                }

                let bytes = bincode::serialize(document)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                table.insert(key.as_slice(), bytes.as_slice())?;

                if !document.embedding.is_empty() {
                    let emb_bytes = encode_embedding(&document.embedding);
                    embeddings.insert(key.as_slice(), emb_bytes.as_slice())?;
                }

                let rkey = recency_key(&cid, document.timestamp, document.id.as_str());
                by_collection.insert(rkey.as_slice(), &[][..])?;
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(documents.len() as u64)
    }

    fn get_document(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
    ) -> Result<Option<Document>> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());

        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let documents = read_txn.open_table(DOCUMENTS_TABLE)?;
        let Some(guard) = documents.get(key.as_slice()).map_err(StorageError::from)? else {
            return Ok(None);
        };
        let mut document: Document = bincode::deserialize(guard.value())
            .map_err(|e| StorageError::corrupted(format!("Invalid document record: {}", e)))?;

        let embeddings = read_txn.open_table(EMBEDDINGS_TABLE)?;
        if let Some(emb) = embeddings.get(key.as_slice()).map_err(StorageError::from)? {
            document.embedding = decode_embedding(emb.value());
        }

        Ok(Some(document))
    }

    fn update_document(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        update: &DocumentUpdate,
    ) -> Result<bool> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let found = {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            let existing = documents.get(key.as_slice()).map_err(StorageError::from)?;
            match existing {
                None => false,
                Some(guard) => {
                    let mut document: Document = bincode::deserialize(guard.value()).map_err(|e| {
                        StorageError::corrupted(format!("Invalid document record: {}", e))
                    })?;
                    drop(guard);

                    if let Some(ref title) = update.title {
                        document.title = title.clone();
                    }
                    if let Some(ref metadata) = update.metadata {
                        for (k, v) in metadata {
                            document.metadata.insert(k.clone(), v.clone());
                        }
                    }

                    let bytes = bincode::serialize(&document)
                        .map_err(|e| StorageError::serialization(e.to_string()))?;
                    documents.insert(key.as_slice(), bytes.as_slice())?;
                    true
                }
            }
        };
        write_txn.commit().map_err(StorageError::from)?;
        Ok(found)
    }

    fn delete_document(&self, collection_id: CollectionId, id: &DocumentId) -> Result<bool> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let found = {
            let mut documents = write_txn.open_table(DOCUMENTS_TABLE)?;
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let mut by_collection = write_txn.open_table(DOCUMENTS_BY_COLLECTION_TABLE)?;

            match documents.remove(key.as_slice())? {
                Some(guard) => {
                    let doc: Document = bincode::deserialize(guard.value()).map_err(|e| {
                        StorageError::corrupted(format!("Invalid document record: {}", e))
                    })?;
                    let rkey = recency_key(&cid, doc.timestamp, doc.id.as_str());
                    by_collection.remove(rkey.as_slice())?;
                    embeddings.remove(key.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit().map_err(StorageError::from)?;
        Ok(found)
    }

    fn save_embedding(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        embedding: &[f32],
    ) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let bytes = encode_embedding(embedding);
            embeddings.insert(key.as_slice(), bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get_embedding(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
    ) -> Result<Option<Vec<f32>>> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let embeddings = read_txn.open_table(EMBEDDINGS_TABLE)?;
        let Some(guard) = embeddings.get(key.as_slice()).map_err(StorageError::from)? else {
            return Ok(None);
        };
        Ok(Some(decode_embedding(guard.value())))
    }

    // =========================================================================
    // Full-text index
    // =========================================================================

    fn index_document_terms(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        term_frequencies: &[(String, u32)],
        token_count: u32,
    ) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut postings_table = write_txn.open_table(FTS_POSTINGS_TABLE)?;
            let mut doc_len_table = write_txn.open_table(FTS_DOC_LEN_TABLE)?;
            let mut doc_terms_table = write_txn.open_table(FTS_DOC_TERMS_TABLE)?;

            // Remove the document's prior postings, if any, so reindexing
            // never leaves stale term entries behind.
            if let Some(old_terms_bytes) = doc_terms_table
                .get(key.as_slice())
                .map_err(StorageError::from)?
            {
                let old_terms: Vec<String> = bincode::deserialize(old_terms_bytes.value())
                    .map_err(|e| StorageError::corrupted(format!("Invalid term list: {}", e)))?;
                drop(old_terms_bytes);
                for term in &old_terms {
                    let tkey = term_key(&cid, term);
                    if let Some(bytes) = postings_table.get(tkey.as_slice()).map_err(StorageError::from)? {
                        let mut postings: PostingsList = bincode::deserialize(bytes.value())
                            .map_err(|e| {
                                StorageError::corrupted(format!("Invalid postings list: {}", e))
                            })?;
                        drop(bytes);
                        postings.postings.retain(|(d, _)| d != id.as_str());
                        if postings.postings.is_empty() {
                            postings_table.remove(tkey.as_slice())?;
                        } else {
                            let bytes = bincode::serialize(&postings)
                                .map_err(|e| StorageError::serialization(e.to_string()))?;
                            postings_table.insert(tkey.as_slice(), bytes.as_slice())?;
                        }
                    }
                }
            }

            let mut new_terms = Vec::with_capacity(term_frequencies.len());
            for (term, freq) in term_frequencies {
                let tkey = term_key(&cid, term);
                let mut postings: PostingsList = match postings_table
                    .get(tkey.as_slice())
                    .map_err(StorageError::from)?
                {
                    Some(bytes) => bincode::deserialize(bytes.value()).map_err(|e| {
                        StorageError::corrupted(format!("Invalid postings list: {}", e))
                    })?,
                    None => PostingsList::default(),
                };
                postings.postings.retain(|(d, _)| d != id.as_str());
                postings.postings.push((id.as_str().to_string(), *freq));
                let bytes = bincode::serialize(&postings)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                postings_table.insert(tkey.as_slice(), bytes.as_slice())?;
                new_terms.push(term.clone());
            }

            doc_len_table.insert(key.as_slice(), token_count.to_le_bytes().as_slice())?;
            let terms_bytes = bincode::serialize(&new_terms)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            doc_terms_table.insert(key.as_slice(), terms_bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn remove_document_terms(&self, collection_id: CollectionId, id: &DocumentId) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut postings_table = write_txn.open_table(FTS_POSTINGS_TABLE)?;
            let mut doc_len_table = write_txn.open_table(FTS_DOC_LEN_TABLE)?;
            let mut doc_terms_table = write_txn.open_table(FTS_DOC_TERMS_TABLE)?;

            if let Some(terms_bytes) = doc_terms_table.remove(key.as_slice())? {
                let terms: Vec<String> = bincode::deserialize(terms_bytes.value())
                    .map_err(|e| StorageError::corrupted(format!("Invalid term list: {}", e)))?;
                for term in &terms {
                    let tkey = term_key(&cid, term);
                    if let Some(bytes) = postings_table.get(tkey.as_slice()).map_err(StorageError::from)? {
                        let mut postings: PostingsList = bincode::deserialize(bytes.value())
                            .map_err(|e| {
                                StorageError::corrupted(format!("Invalid postings list: {}", e))
                            })?;
                        drop(bytes);
                        postings.postings.retain(|(d, _)| d != id.as_str());
                        if postings.postings.is_empty() {
                            postings_table.remove(tkey.as_slice())?;
                        } else {
                            let bytes = bincode::serialize(&postings)
                                .map_err(|e| StorageError::serialization(e.to_string()))?;
                            postings_table.insert(tkey.as_slice(), bytes.as_slice())?;
                        }
                    }
                }
            }
            doc_len_table.remove(key.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn get_postings(&self, collection_id: CollectionId, term: &str) -> Result<PostingsList> {
        let cid = *collection_id.as_bytes();
        let tkey = term_key(&cid, term);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(FTS_POSTINGS_TABLE)?;
        match table.get(tkey.as_slice()).map_err(StorageError::from)? {
            Some(bytes) => bincode::deserialize(bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid postings list: {}", e)).into()),
            None => Ok(PostingsList::default()),
        }
    }

    fn get_postings_by_prefix(
        &self,
        collection_id: CollectionId,
        prefix: &str,
    ) -> Result<Vec<(String, PostingsList)>> {
        let cid = *collection_id.as_bytes();
        let start = term_key(&cid, prefix);
        let end = term_prefix_end(&cid, prefix);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(FTS_POSTINGS_TABLE)?;
        let mut out = Vec::new();
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
        {
            let (k, v) = entry.map_err(StorageError::from)?;
            let term = String::from_utf8_lossy(&k.value()[16..]).into_owned();
            let postings: PostingsList = bincode::deserialize(v.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid postings list: {}", e)))?;
            out.push((term, postings));
        }
        Ok(out)
    }

    fn fts_corpus_stats(&self, collection_id: CollectionId) -> Result<(u64, u64)> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(FTS_DOC_LEN_TABLE)?;
        let mut total_docs = 0u64;
        let mut total_tokens = 0u64;
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
        {
            let (_, v) = entry.map_err(StorageError::from)?;
            let bytes: [u8; 4] = v.value().try_into().unwrap_or([0; 4]);
            total_tokens += u32::from_le_bytes(bytes) as u64;
            total_docs += 1;
        }
        Ok((total_docs, total_tokens))
    }

    fn document_length(&self, collection_id: CollectionId, id: &DocumentId) -> Result<Option<u32>> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(FTS_DOC_LEN_TABLE)?;
        let Some(guard) = table.get(key.as_slice()).map_err(StorageError::from)? else {
            return Ok(None);
        };
        let bytes: [u8; 4] = guard.value().try_into().unwrap_or([0; 4]);
        Ok(Some(u32::from_le_bytes(bytes)))
    }

    // =========================================================================
    // Embedding queue
    // =========================================================================

    fn enqueue_embedding(&self, item: &QueueItem) -> Result<()> {
        let cid = *item.collection_id.as_bytes();
        let key = doc_key(&cid, item.document_id.as_str());
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
            let bytes =
                bincode::serialize(item).map_err(|e| StorageError::serialization(e.to_string()))?;
            table.insert(key.as_slice(), bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn claim_pending_embeddings(
        &self,
        collection_id: CollectionId,
        limit: usize,
    ) -> Result<Vec<QueueItem>> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let claimed = {
            let mut table = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;

            let mut pending: Vec<(Vec<u8>, QueueItem)> = {
                table
                    .range(start.as_slice()..end.as_slice())
                    .map_err(StorageError::from)?
                    .map(|entry| {
                        let (k, v) = entry.map_err(StorageError::from)?;
                        let item: QueueItem = bincode::deserialize(v.value()).map_err(|e| {
                            StorageError::corrupted(format!("Invalid queue item: {}", e))
                        })?;
                        Ok::<_, StorageError>((k.value().to_vec(), item))
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            pending.retain(|(_, item)| item.status == QueueStatus::Pending);
            pending.sort_by(|a, b| {
                b.1.priority
                    .cmp(&a.1.priority)
                    .then(a.1.created_at.cmp(&b.1.created_at))
            });
            pending.truncate(limit);

            let mut out = Vec::with_capacity(pending.len());
            for (key, mut item) in pending {
                item.status = QueueStatus::Processing;
                item.updated_at = Timestamp::now();
                let bytes = bincode::serialize(&item)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                table.insert(key.as_slice(), bytes.as_slice())?;
                out.push(item);
            }
            out
        };
        write_txn.commit().map_err(StorageError::from)?;
        Ok(claimed)
    }

    fn complete_embedding(&self, collection_id: CollectionId, id: &DocumentId) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
            if let Some(bytes) = table.get(key.as_slice()).map_err(StorageError::from)? {
                let mut item: QueueItem = bincode::deserialize(bytes.value())
                    .map_err(|e| StorageError::corrupted(format!("Invalid queue item: {}", e)))?;
                drop(bytes);
                item.status = QueueStatus::Completed;
                item.updated_at = Timestamp::now();
                let bytes = bincode::serialize(&item)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                table.insert(key.as_slice(), bytes.as_slice())?;
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn complete_embedding_with_vector(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        embedding: &[f32],
    ) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut embeddings = write_txn.open_table(EMBEDDINGS_TABLE)?;
            let bytes = encode_embedding(embedding);
            embeddings.insert(key.as_slice(), bytes.as_slice())?;
        }
        {
            let mut queue = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
            if let Some(bytes) = queue.get(key.as_slice()).map_err(StorageError::from)? {
                let mut item: QueueItem = bincode::deserialize(bytes.value())
                    .map_err(|e| StorageError::corrupted(format!("Invalid queue item: {}", e)))?;
                drop(bytes);
                item.status = QueueStatus::Completed;
                item.updated_at = Timestamp::now();
                let bytes = bincode::serialize(&item)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                queue.insert(key.as_slice(), bytes.as_slice())?;
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn fail_embedding(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        error: &str,
    ) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let key = doc_key(&cid, id.as_str());
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
            if let Some(bytes) = table.get(key.as_slice()).map_err(StorageError::from)? {
                let mut item: QueueItem = bincode::deserialize(bytes.value())
                    .map_err(|e| StorageError::corrupted(format!("Invalid queue item: {}", e)))?;
                drop(bytes);
                item.status = QueueStatus::Failed;
                item.attempts = item.attempts.saturating_add(1);
                item.last_error = Some(error.to_string());
                item.updated_at = Timestamp::now();
                let bytes = bincode::serialize(&item)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                table.insert(key.as_slice(), bytes.as_slice())?;
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn queue_status_counts(&self, collection_id: CollectionId) -> Result<[u64; 4]> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
        let mut counts = [0u64; 4];
        for entry in table
            .range(start.as_slice()..end.as_slice())
            .map_err(StorageError::from)?
        {
            let (_, v) = entry.map_err(StorageError::from)?;
            let item: QueueItem = bincode::deserialize(v.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid queue item: {}", e)))?;
            let idx = match item.status {
                QueueStatus::Pending => 0,
                QueueStatus::Processing => 1,
                QueueStatus::Completed => 2,
                QueueStatus::Failed => 3,
            };
            counts[idx] += 1;
        }
        Ok(counts)
    }

    fn clear_queue(&self, collection_id: CollectionId, status: Option<QueueStatus>) -> Result<u64> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut removed = 0u64;
        {
            let matching_keys: Vec<Vec<u8>> = {
                let table = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
                let mut keys = Vec::new();
                for entry in table
                    .range(start.as_slice()..end.as_slice())
                    .map_err(StorageError::from)?
                {
                    let (k, v) = entry.map_err(StorageError::from)?;
                    if let Some(want) = status {
                        let item: QueueItem = bincode::deserialize(v.value()).map_err(|e| {
                            StorageError::corrupted(format!("Invalid queue item: {}", e))
                        })?;
                        if item.status != want {
                            continue;
                        }
                    }
                    keys.push(k.value().to_vec());
                }
                keys
            };

            let mut table = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
            for key in &matching_keys {
                if table.remove(key.as_slice())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(removed)
    }

    fn requeue_processing(&self, collection_id: CollectionId) -> Result<u64> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut requeued = 0u64;
        {
            let mut table = write_txn.open_table(EMBEDDING_QUEUE_TABLE)?;
            let stuck: Vec<(Vec<u8>, QueueItem)> = table
                .range(start.as_slice()..end.as_slice())
                .map_err(StorageError::from)?
                .map(|entry| {
                    let (k, v) = entry.map_err(StorageError::from)?;
                    let item: QueueItem = bincode::deserialize(v.value())
                        .map_err(|e| StorageError::corrupted(format!("Invalid queue item: {}", e)))?;
                    Ok::<_, StorageError>((k.value().to_vec(), item))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|(_, item)| item.status == QueueStatus::Processing)
                .collect();

            for (key, mut item) in stuck {
                item.status = QueueStatus::Pending;
                item.updated_at = Timestamp::now();
                let bytes = bincode::serialize(&item)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                table.insert(key.as_slice(), bytes.as_slice())?;
                requeued += 1;
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(requeued)
    }

    // =========================================================================
    // SQL cache tier
    // =========================================================================

    fn cache_get(&self, collection_id: CollectionId, key: &str) -> Result<Option<CacheEntry>> {
        let cid = *collection_id.as_bytes();
        let ckey = term_key(&cid, key);
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(CACHE_SQL_TABLE)?;
        let Some(bytes) = table.get(ckey.as_slice()).map_err(StorageError::from)? else {
            return Ok(None);
        };
        let entry: CacheEntry = bincode::deserialize(bytes.value())
            .map_err(|e| StorageError::corrupted(format!("Invalid cache entry: {}", e)))?;
        if entry.expires_at.has_elapsed() {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn cache_set(&self, collection_id: CollectionId, key: &str, entry: &CacheEntry) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let ckey = term_key(&cid, key);
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(CACHE_SQL_TABLE)?;
            let bytes = bincode::serialize(entry)
                .map_err(|e| StorageError::serialization(e.to_string()))?;
            table.insert(ckey.as_slice(), bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn cache_delete(&self, collection_id: CollectionId, key: &str) -> Result<()> {
        let cid = *collection_id.as_bytes();
        let ckey = term_key(&cid, key);
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut table = write_txn.open_table(CACHE_SQL_TABLE)?;
            table.remove(ckey.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn cache_invalidate_prefix(&self, collection_id: CollectionId, prefix: &str) -> Result<u64> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut removed = 0u64;
        {
            let matching_keys: Vec<Vec<u8>> = {
                let table = write_txn.open_table(CACHE_SQL_TABLE)?;
                let mut keys = Vec::new();
                for entry in table
                    .range(start.as_slice()..end.as_slice())
                    .map_err(StorageError::from)?
                {
                    let (k, _) = entry.map_err(StorageError::from)?;
                    let key_bytes = k.value();
                    let suffix = String::from_utf8_lossy(&key_bytes[16..]);
                    if prefix.is_empty() || suffix.starts_with(prefix) {
                        keys.push(key_bytes.to_vec());
                    }
                }
                keys
            };

            let mut table = write_txn.open_table(CACHE_SQL_TABLE)?;
            for key in &matching_keys {
                if table.remove(key.as_slice())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(removed)
    }

    fn cache_invalidate_tag(&self, collection_id: CollectionId, tag: &str) -> Result<u64> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut removed = 0u64;
        {
            let matching_keys: Vec<Vec<u8>> = {
                let table = write_txn.open_table(CACHE_SQL_TABLE)?;
                let mut keys = Vec::new();
                for entry in table
                    .range(start.as_slice()..end.as_slice())
                    .map_err(StorageError::from)?
                {
                    let (k, v) = entry.map_err(StorageError::from)?;
                    let entry: CacheEntry = bincode::deserialize(v.value()).map_err(|e| {
                        StorageError::corrupted(format!("Invalid cache entry: {}", e))
                    })?;
                    if entry.tags.iter().any(|t| t == tag) {
                        keys.push(k.value().to_vec());
                    }
                }
                keys
            };

            let mut table = write_txn.open_table(CACHE_SQL_TABLE)?;
            for key in &matching_keys {
                if table.remove(key.as_slice())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(removed)
    }

    fn cache_sweep_expired(&self, collection_id: CollectionId) -> Result<u64> {
        let cid = *collection_id.as_bytes();
        let start = collection_prefix_start(&cid);
        let end = collection_prefix_end(&cid);

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let mut removed = 0u64;
        {
            let expired_keys: Vec<Vec<u8>> = {
                let table = write_txn.open_table(CACHE_SQL_TABLE)?;
                let mut keys = Vec::new();
                for entry in table
                    .range(start.as_slice()..end.as_slice())
                    .map_err(StorageError::from)?
                {
                    let (k, v) = entry.map_err(StorageError::from)?;
                    let entry: CacheEntry = bincode::deserialize(v.value()).map_err(|e| {
                        StorageError::corrupted(format!("Invalid cache entry: {}", e))
                    })?;
                    if entry.expires_at.has_elapsed() {
                        keys.push(k.value().to_vec());
                    }
                }
                keys
            };

            let mut table = write_txn.open_table(CACHE_SQL_TABLE)?;
            for key in &expired_keys {
                if table.remove(key.as_slice())?.is_some() {
                    removed += 1;
                }
            }
        }
        write_txn.commit().map_err(StorageError::from)?;
        Ok(removed)
    }

    #[instrument(skip(self))]
    fn export(&self) -> Result<Vec<u8>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;

        let metadata_table = read_txn.open_table(METADATA_TABLE)?;
        let metadata = metadata_table
            .iter()
            .map_err(StorageError::from)?
            .map(|e| e.map(|(k, v)| (k.value().to_string(), v.value().to_vec())))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StorageError::from)?;

        let collections = dump_bytes_table(&read_txn, COLLECTIONS_TABLE)?;
        let documents = dump_bytes_table(&read_txn, DOCUMENTS_TABLE)?;
        let documents_by_collection = dump_bytes_table(&read_txn, DOCUMENTS_BY_COLLECTION_TABLE)?;
        let embeddings = dump_bytes_table(&read_txn, EMBEDDINGS_TABLE)?;
        let fts_postings = dump_bytes_table(&read_txn, FTS_POSTINGS_TABLE)?;
        let fts_doc_len = dump_bytes_table(&read_txn, FTS_DOC_LEN_TABLE)?;
        let fts_doc_terms = dump_bytes_table(&read_txn, FTS_DOC_TERMS_TABLE)?;
        let embedding_queue = dump_bytes_table(&read_txn, EMBEDDING_QUEUE_TABLE)?;
        let cache_sql = dump_bytes_table(&read_txn, CACHE_SQL_TABLE)?;

        let snapshot = ExportSnapshot {
            schema_version: self.metadata.schema_version,
            metadata,
            collections,
            documents,
            documents_by_collection,
            embeddings,
            fts_postings,
            fts_doc_len,
            fts_doc_terms,
            embedding_queue,
            cache_sql,
        };

        bincode::serialize(&snapshot).map_err(|e| StorageError::serialization(e.to_string()).into())
    }

    #[instrument(skip(self, data))]
    fn import(&self, data: &[u8]) -> Result<()> {
        let snapshot: ExportSnapshot = bincode::deserialize(data)
            .map_err(|e| StorageError::corrupted(format!("Invalid export blob: {}", e)))?;

        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(LocalRetrieveError::Database(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: snapshot.schema_version,
            }));
        }

        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        {
            let mut metadata_table = write_txn.open_table(METADATA_TABLE)?;
            for (k, v) in &snapshot.metadata {
                metadata_table.insert(k.as_str(), v.as_slice())?;
            }

            load_bytes_table(&write_txn, COLLECTIONS_TABLE, &snapshot.collections)?;
            load_bytes_table(&write_txn, DOCUMENTS_TABLE, &snapshot.documents)?;
            load_bytes_table(
                &write_txn,
                DOCUMENTS_BY_COLLECTION_TABLE,
                &snapshot.documents_by_collection,
            )?;
            load_bytes_table(&write_txn, EMBEDDINGS_TABLE, &snapshot.embeddings)?;
            load_bytes_table(&write_txn, FTS_POSTINGS_TABLE, &snapshot.fts_postings)?;
            load_bytes_table(&write_txn, FTS_DOC_LEN_TABLE, &snapshot.fts_doc_len)?;
            load_bytes_table(&write_txn, FTS_DOC_TERMS_TABLE, &snapshot.fts_doc_terms)?;
            load_bytes_table(&write_txn, EMBEDDING_QUEUE_TABLE, &snapshot.embedding_queue)?;
            load_bytes_table(&write_txn, CACHE_SQL_TABLE, &snapshot.cache_sql)?;
        }
        write_txn.commit().map_err(StorageError::from)?;
        info!(
            documents = snapshot.documents.len(),
            collections = snapshot.collections.len(),
            "Imported database snapshot"
        );
        Ok(())
    }
}

/// Dumps every row of a `&[u8] -> &[u8]` table as owned byte pairs.
fn dump_bytes_table(
    read_txn: &::redb::ReadTransaction,
    table_def: redb::TableDefinition<&[u8], &[u8]>,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let table = read_txn.open_table(table_def)?;
    let rows = table
        .iter()
        .map_err(StorageError::from)?
        .map(|e| e.map(|(k, v)| (k.value().to_vec(), v.value().to_vec())))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(StorageError::from)?;
    Ok(rows)
}

/// Inserts owned byte pairs into a `&[u8] -> &[u8]` table within an
/// in-progress write transaction.
fn load_bytes_table(
    write_txn: &::redb::WriteTransaction,
    table_def: redb::TableDefinition<&[u8], &[u8]>,
    rows: &[(Vec<u8>, Vec<u8>)],
) -> Result<()> {
    let mut table = write_txn.open_table(table_def)?;
    for (k, v) in rows {
        table.insert(k.as_slice(), v.as_slice())?;
    }
    Ok(())
}

// Implement Send and Sync - redb::Database is Send + Sync
unsafe impl Send for RedbStorage {}
unsafe impl Sync for RedbStorage {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ProviderKind;
    use crate::document::NewDocument;
    use serde_json::Map;
    use tempfile::tempdir;

    fn default_config() -> Config {
        Config::default()
    }

    fn sample_document(collection_id: CollectionId, doc_id: &str, dim: usize) -> Document {
        Document {
            id: DocumentId::new(doc_id),
            collection_id,
            title: Some("Title".into()),
            content: "hello world".into(),
            embedding: vec![0.1; dim],
            metadata: Map::new(),
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn test_open_creates_new_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        assert!(!path.exists());

        let storage = RedbStorage::open(&path, &default_config()).unwrap();

        assert!(path.exists());
        assert_eq!(storage.metadata().schema_version, SCHEMA_VERSION);
        assert_eq!(
            storage.metadata().embedding_dimension,
            EmbeddingDimension::D384
        );

        Box::new(storage).close().unwrap();
    }

    #[test]
    fn test_open_existing_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let storage = RedbStorage::open(&path, &default_config()).unwrap();
        let created_at = storage.metadata().created_at;
        Box::new(storage).close().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let storage = RedbStorage::open(&path, &default_config()).unwrap();

        assert_eq!(storage.metadata().created_at, created_at);
        assert!(storage.metadata().last_opened_at > created_at);

        Box::new(storage).close().unwrap();
    }

    #[test]
    fn test_dimension_mismatch_returns_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let config_384 = Config {
            embedding_dimension: EmbeddingDimension::D384,
            ..Default::default()
        };
        let storage = RedbStorage::open(&path, &config_384).unwrap();
        Box::new(storage).close().unwrap();

        let config_768 = Config {
            embedding_dimension: EmbeddingDimension::D768,
            ..Default::default()
        };
        let result = RedbStorage::open(&path, &config_768);

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            LocalRetrieveError::Validation(ValidationError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_collection_crud_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let collection = Collection::new("docs", EmbeddingDimension::D384, ProviderKind::Local);
        storage.save_collection(&collection).unwrap();

        let fetched = storage.get_collection(collection.id).unwrap().unwrap();
        assert_eq!(fetched.name, "docs");

        let by_name = storage.get_collection_by_name("docs").unwrap().unwrap();
        assert_eq!(by_name.id, collection.id);

        assert_eq!(storage.list_collections().unwrap().len(), 1);
        assert!(storage.delete_collection(collection.id).unwrap());
        assert!(storage.get_collection(collection.id).unwrap().is_none());
    }

    #[test]
    fn test_document_crud_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();

        let collection_id = CollectionId::new();
        let doc = sample_document(collection_id, "doc-1", 384);
        storage.save_document(&doc).unwrap();

        let fetched = storage
            .get_document(collection_id, &DocumentId::new("doc-1"))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.content, "hello world");
        assert_eq!(fetched.embedding.len(), 384);

        assert_eq!(storage.count_documents_in_collection(collection_id).unwrap(), 1);

        let update = DocumentUpdate {
            title: Some(Some("New title".into())),
            metadata: None,
        };
        assert!(storage
            .update_document(collection_id, &DocumentId::new("doc-1"), &update)
            .unwrap());
        let fetched = storage
            .get_document(collection_id, &DocumentId::new("doc-1"))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.title, Some("New title".into()));

        assert!(storage
            .delete_document(collection_id, &DocumentId::new("doc-1"))
            .unwrap());
        assert!(storage
            .get_document(collection_id, &DocumentId::new("doc-1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_recent_document_ids_ordering() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();
        let collection_id = CollectionId::new();

        for i in 0..5 {
            let mut doc = sample_document(collection_id, &format!("doc-{i}"), 8);
            doc.timestamp = Timestamp::from_millis(1000 + i as i64);
            storage.save_document(&doc).unwrap();
        }

        let recent = storage.get_recent_document_ids(collection_id, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].0.as_str(), "doc-4");
        assert_eq!(recent[1].0.as_str(), "doc-3");
    }

    #[test]
    fn test_fts_index_and_remove() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();
        let collection_id = CollectionId::new();
        let doc_id = DocumentId::new("doc-1");

        storage
            .index_document_terms(
                collection_id,
                &doc_id,
                &[("hello".into(), 2), ("world".into(), 1)],
                3,
            )
            .unwrap();

        let postings = storage.get_postings(collection_id, "hello").unwrap();
        assert_eq!(postings.postings.len(), 1);
        assert_eq!(postings.postings[0], ("doc-1".to_string(), 2));

        let (docs, tokens) = storage.fts_corpus_stats(collection_id).unwrap();
        assert_eq!(docs, 1);
        assert_eq!(tokens, 3);

        storage.remove_document_terms(collection_id, &doc_id).unwrap();
        let postings = storage.get_postings(collection_id, "hello").unwrap();
        assert!(postings.postings.is_empty());
    }

    #[test]
    fn test_embedding_queue_lifecycle() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();
        let collection_id = CollectionId::new();
        let doc_id = DocumentId::new("doc-1");

        let item = QueueItem {
            collection_id,
            document_id: doc_id.clone(),
            priority: 5,
            status: QueueStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
        };
        storage.enqueue_embedding(&item).unwrap();

        let claimed = storage.claim_pending_embeddings(collection_id, 10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, QueueStatus::Processing);

        storage.complete_embedding(collection_id, &doc_id).unwrap();
        let counts = storage.queue_status_counts(collection_id).unwrap();
        assert_eq!(counts[2], 1); // Completed

        let removed = storage.clear_queue(collection_id, None).unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_cache_tier_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.db"), &default_config()).unwrap();
        let collection_id = CollectionId::new();

        let entry = CacheEntry {
            value: b"cached".to_vec(),
            tags: vec!["tag1".into()],
            created_at: Timestamp::now(),
            expires_at: Timestamp::now().plus(std::time::Duration::from_secs(60)),
        };
        storage.cache_set(collection_id, "key1", &entry).unwrap();

        let fetched = storage.cache_get(collection_id, "key1").unwrap().unwrap();
        assert_eq!(fetched.value, b"cached");

        let removed = storage.cache_invalidate_prefix(collection_id, "key").unwrap();
        assert_eq!(removed, 1);
        assert!(storage.cache_get(collection_id, "key1").unwrap().is_none());
    }

    #[test]
    fn test_no_op_helper_not_unused() {
        // exercises Document::new-like construction via NewDocument default path
        let _ = NewDocument::default();
    }
}
