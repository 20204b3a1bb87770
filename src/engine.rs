//! [`Engine`]: the primary handle for collections, documents, hybrid search,
//! and the embedding queue.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use localretrieve::{Config, Engine, ProviderKind};
//!
//! let engine = Engine::open("./search.db", Config::default())?;
//! let collection_id = engine.create_collection("docs", ProviderKind::Local)?;
//! engine.close()?;
//! ```
//!
//! # Thread Safety
//!
//! `Engine` is `Send + Sync` and can be shared across threads/tasks via
//! `Arc`. Storage enforces single-writer MVCC internally; the engine adds no
//! further write serialization of its own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, instrument, warn};

use crate::cache::CacheCoordinator;
use crate::collection::{validate_collection_name, Collection, CollectionStats, ProviderKind};
use crate::config::Config;
use crate::document::{
    validate_document_update, validate_new_document, Document, DocumentUpdate, NewDocument,
};
use crate::embedding::ProviderRegistry;
use crate::error::{LocalRetrieveError, NotFoundError, Result};
use crate::fts::Bm25Index;
use crate::queue::{self, QueueProcessResult};
use crate::query::QueryPipeline;
use crate::search::{self, ModePreference, SearchResult};
use crate::storage::{open_storage, DatabaseMetadata, QueueStatus, StorageEngine};
use crate::types::{CollectionId, DocumentId};
use crate::vector::HnswIndex;

use serde::Deserialize;

/// Params for the `createCollection` RPC method.
#[derive(Deserialize)]
struct CreateCollectionParams {
    name: String,
    provider: ProviderKind,
}

/// Params shared by the `search`/`searchSemantic`/`searchText`/`searchAdvanced` RPC methods.
#[derive(Deserialize)]
struct SearchParams {
    collection_id: CollectionId,
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    10
}

/// Params for the `processEmbeddingQueue` RPC method.
#[derive(Deserialize)]
struct ProcessQueueParams {
    collection_id: CollectionId,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
}

fn default_batch_size() -> usize {
    32
}

/// Wraps a malformed `params` payload as a handler error rather than a
/// transport-level failure; the caller sent bad JSON, not a broken worker.
fn invalid_params(e: serde_json::Error) -> crate::error::RpcError {
    crate::error::RpcError::Handler {
        code: "VALIDATION_ERROR".to_string(),
        message: format!("invalid params: {e}"),
    }
}

/// Maps an engine-level error onto the RPC error boundary, preserving its
/// stable `code()` so hosts can match on it.
fn handler_error(e: LocalRetrieveError) -> crate::error::RpcError {
    crate::error::RpcError::Handler {
        code: e.code().to_string(),
        message: e.to_string(),
    }
}

/// A result that serialized fine going in should always serialize fine
/// going out; this only trips on values RPC methods don't actually return
/// (e.g. NaN floats), so it's reported as a handler error rather than
/// unwrapped.
fn serialize_error(e: serde_json::Error) -> crate::error::RpcError {
    crate::error::RpcError::Handler {
        code: "SERIALIZATION_ERROR".to_string(),
        message: e.to_string(),
    }
}

/// The main LocalRetrieve engine handle.
///
/// Owns storage, the per-collection HNSW indexes, the three-tier cache, the
/// embedding provider registry, and the query-embedding pipeline. This is
/// the single logical owner a worker-isolated deployment would run its
/// request loop against; embedded here, it's just a `Send + Sync` struct
/// callers share via `Arc`.
pub struct Engine {
    storage: Arc<dyn StorageEngine>,
    config: Config,

    /// Per-collection HNSW vector indexes.
    ///
    /// Outer `RwLock` protects the map (collection add/remove); each
    /// `HnswIndex` has its own internal locking for concurrent search+insert.
    vectors: RwLock<HashMap<CollectionId, Arc<HnswIndex>>>,

    cache: Arc<CacheCoordinator>,
    providers: Arc<ProviderRegistry>,
    query_pipeline: Arc<QueryPipeline>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let vector_count = self.vectors.read().map(|v| v.len()).unwrap_or(0);
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("embedding_dimension", &self.embedding_dimension())
            .field("collections", &vector_count)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens or creates an engine at the specified path.
    ///
    /// If the database file doesn't exist, it's created with the given
    /// configuration. If it exists, the configuration is validated against
    /// the stored metadata (schema version, embedding dimension must match).
    ///
    /// Rebuilds every collection's HNSW index from storage-committed
    /// embeddings (the source of truth), since the graph itself is not
    /// persisted across opens — only its metadata.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate().map_err(LocalRetrieveError::from)?;

        info!("Opening LocalRetrieve engine");

        let storage: Arc<dyn StorageEngine> = Arc::from(open_storage(&path, &config)?);
        let vectors = Self::load_all_indexes(storage.as_ref(), &config)?;

        let cache = Arc::new(CacheCoordinator::open(Self::cache_path(path.as_ref()), &config.cache)?);
        let providers = Arc::new(ProviderRegistry::new(
            config.embedding_provider.clone(),
            config.provider.clone(),
        ));
        let deadline = config.provider.http_timeout.max(config.provider.local_timeout);
        let query_pipeline = Arc::new(QueryPipeline::new(cache.clone(), deadline));

        info!(
            dimension = config.embedding_dimension.size(),
            sync_mode = ?config.sync_mode,
            collections = vectors.len(),
            "engine opened successfully"
        );

        let engine = Self {
            storage,
            config,
            vectors: RwLock::new(vectors),
            cache,
            providers,
            query_pipeline,
        };

        engine.recover_stuck_embeddings()?;

        Ok(engine)
    }

    /// Closes the engine, persisting every collection's HNSW index metadata.
    ///
    /// Consumes `self`; storage itself has no explicit flush step beyond
    /// dropping the last `Arc` reference (redb commits durably on write, so
    /// this always returns `Ok(())` in practice — matching the underlying
    /// storage engine's own `close()` contract).
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing LocalRetrieve engine");

        if let Some(hnsw_dir) = self.hnsw_dir() {
            let vectors = self
                .vectors
                .read()
                .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned during close"))?;
            for (collection_id, index) in vectors.iter() {
                if let Err(e) = index.save_to_dir(&hnsw_dir, &collection_id.to_string()) {
                    warn!(
                        collection = %collection_id,
                        error = %e,
                        "Failed to save HNSW index metadata (will rebuild on next open)"
                    );
                }
            }
        }

        info!("engine closed successfully");
        Ok(())
    }

    /// Returns a reference to the engine configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the database metadata (schema version, dimension, timestamps).
    #[inline]
    pub fn metadata(&self) -> &DatabaseMetadata {
        self.storage.metadata()
    }

    /// Returns the embedding dimension this engine was opened with.
    #[inline]
    pub fn embedding_dimension(&self) -> usize {
        self.config.embedding_dimension.size()
    }

    // =========================================================================
    // HNSW index lifecycle
    // =========================================================================

    fn cache_path(db_path: &Path) -> PathBuf {
        let mut p = db_path.as_os_str().to_owned();
        p.push(".cache-idb");
        PathBuf::from(p)
    }

    /// Directory for HNSW index metadata files: `{db_path}.hnsw/`. Returns
    /// `None` for storage with no backing file (e.g. in-memory tests).
    fn hnsw_dir(&self) -> Option<PathBuf> {
        self.storage.path().map(|p| {
            let mut hnsw_path = p.as_os_str().to_owned();
            hnsw_path.push(".hnsw");
            PathBuf::from(hnsw_path)
        })
    }

    /// Rebuilds every collection's HNSW graph from redb-stored embeddings
    /// (the source of truth) and restores each index's soft-deleted set from
    /// persisted metadata, if present.
    fn load_all_indexes(
        storage: &dyn StorageEngine,
        config: &Config,
    ) -> Result<HashMap<CollectionId, Arc<HnswIndex>>> {
        let collections = storage.list_collections()?;
        let mut vectors = HashMap::with_capacity(collections.len());

        let hnsw_dir = storage.path().map(|p| {
            let mut hnsw_path = p.as_os_str().to_owned();
            hnsw_path.push(".hnsw");
            PathBuf::from(hnsw_path)
        });

        for collection in &collections {
            let dimension = collection.dimension as usize;
            let embeddings = storage.list_embeddings_in_collection(collection.id)?;

            let metadata = hnsw_dir
                .as_ref()
                .and_then(|dir| HnswIndex::load_metadata(dir, &collection.id.to_string()).ok())
                .flatten();

            let index = if embeddings.is_empty() {
                HnswIndex::new(dimension, &config.vector_index)
            } else {
                let start = std::time::Instant::now();
                let idx = HnswIndex::rebuild_from_embeddings(dimension, &config.vector_index, embeddings)?;
                info!(
                    collection = %collection.id,
                    vectors = idx.active_count(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "rebuilt HNSW index from storage embeddings"
                );
                idx
            };

            if let Some(meta) = metadata {
                index.restore_deleted_set(&meta.deleted)?;
            }

            vectors.insert(collection.id, Arc::new(index));
        }

        Ok(vectors)
    }

    /// Executes a closure with the HNSW index for a collection, while the
    /// outer read lock is held. Returns `None` if the collection has no
    /// index (e.g. it does not exist).
    fn with_vector_index<F, R>(&self, collection_id: CollectionId, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&HnswIndex) -> Result<R>,
    {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?;
        match vectors.get(&collection_id) {
            Some(index) => Ok(Some(f(index)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Collection management
    // =========================================================================

    /// Creates a new collection with the given name and provider kind.
    ///
    /// The collection's embedding dimension is locked to the engine's
    /// configured dimension at creation time.
    #[instrument(skip(self))]
    pub fn create_collection(&self, name: &str, provider: ProviderKind) -> Result<CollectionId> {
        validate_collection_name(name)?;

        let collection = Collection::new(name, self.config.embedding_dimension, provider);
        let id = collection.id;
        let dimension = collection.dimension as usize;

        self.storage.save_collection(&collection)?;

        let index = HnswIndex::new(dimension, &self.config.vector_index);
        self.vectors
            .write()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?
            .insert(id, Arc::new(index));

        info!(id = %id, name = %name, "collection created");
        Ok(id)
    }

    /// Returns a collection by ID, or `None` if not found.
    pub fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>> {
        self.storage.get_collection(id)
    }

    /// Returns a collection by its unique name, or `None` if not found.
    pub fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        self.storage.get_collection_by_name(name)
    }

    /// Lists every collection in the engine.
    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        self.storage.list_collections()
    }

    /// Returns aggregate statistics for a collection.
    pub fn get_collection_stats(&self, id: CollectionId) -> Result<CollectionStats> {
        let document_count = self.storage.count_documents_in_collection(id)?;
        let active_vector_count = self
            .with_vector_index(id, |index| Ok(index.active_count() as u64))?
            .unwrap_or(0);
        let queued = self.storage.queue_status_counts(id)?;
        let queued_embeddings = queued[QueueStatus::Pending as usize] + queued[QueueStatus::Processing as usize];

        Ok(CollectionStats {
            document_count,
            active_vector_count,
            distinct_term_count: 0,
            queued_embeddings,
        })
    }

    /// Deletes a collection and cascades to its documents, FTS postings,
    /// embedding queue rows, cache entries, and HNSW index.
    #[instrument(skip(self))]
    pub fn delete_collection(&self, id: CollectionId) -> Result<bool> {
        let existed = self.storage.delete_collection(id)?;
        if !existed {
            return Ok(false);
        }

        self.storage.delete_documents_by_collection(id)?;
        queue::clear(self.storage.as_ref(), id, None)?;
        self.cache.invalidate(self.storage.as_ref(), id, "*")?;

        self.vectors
            .write()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?
            .remove(&id);

        if let Some(dir) = self.hnsw_dir() {
            if let Err(e) = HnswIndex::remove_files(&dir, &id.to_string()) {
                warn!(collection = %id, error = %e, "failed to remove HNSW index files");
            }
        }

        info!(id = %id, "collection deleted");
        Ok(true)
    }

    // =========================================================================
    // Document management
    // =========================================================================

    /// Inserts or replaces a document.
    ///
    /// If `doc.embedding` is `None` and the collection's provider can
    /// generate embeddings (Local/OpenAI), the document is enqueued for
    /// asynchronous embedding via [`Self::process_embedding_queue`] instead
    /// of blocking this call on a provider round-trip.
    #[instrument(skip(self, doc), fields(id = %doc.id, collection = %doc.collection_id))]
    pub async fn upsert_document(&self, doc: NewDocument) -> Result<()> {
        let collection = self
            .storage
            .get_collection(doc.collection_id)?
            .ok_or_else(|| NotFoundError::collection(doc.collection_id))?;

        let is_external = collection.provider == ProviderKind::External;
        validate_new_document(&doc, collection.dimension, is_external)?;

        let embedding = match doc.embedding {
            Some(embedding) => Some(embedding),
            None if is_external => unreachable!("validate_new_document requires embedding for External"),
            None => None,
        };

        let document = Document {
            id: doc.id.clone(),
            collection_id: doc.collection_id,
            title: doc.title,
            content: doc.content,
            embedding: embedding.clone().unwrap_or_default(),
            metadata: doc.metadata,
            timestamp: crate::types::Timestamp::now(),
        };

        self.storage.save_document(&document)?;

        let bm25 = Bm25Index::new(self.storage.as_ref());
        bm25.index_document(document.collection_id, &document.id, &document.content)?;

        if let Some(embedding) = embedding {
            self.insert_into_vector_index(document.collection_id, &document.id, &embedding)?;
        } else {
            queue::enqueue(self.storage.as_ref(), document.collection_id, document.id.clone(), 0)?;
        }

        Ok(())
    }

    fn insert_into_vector_index(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        embedding: &[f32],
    ) -> Result<()> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?;
        if let Some(index) = vectors.get(&collection_id) {
            index.insert_document(id.clone(), embedding)?;
        }
        Ok(())
    }

    /// Retrieves a document by ID within a collection.
    pub fn get_document(&self, collection_id: CollectionId, id: &DocumentId) -> Result<Option<Document>> {
        self.storage.get_document(collection_id, id)
    }

    /// Updates a document's mutable fields (title, metadata merge). Content
    /// and embedding are immutable; replace the document via
    /// [`Self::upsert_document`] to change them.
    pub fn update_document(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        update: DocumentUpdate,
    ) -> Result<bool> {
        validate_document_update(&update)?;
        self.storage.update_document(collection_id, id, &update)
    }

    /// Permanently deletes a document from storage, the FTS index, and the
    /// vector index (soft-delete).
    #[instrument(skip(self))]
    pub fn delete_document(&self, collection_id: CollectionId, id: &DocumentId) -> Result<bool> {
        let existed = self.storage.delete_document(collection_id, id)?;
        if !existed {
            return Ok(false);
        }

        let bm25 = Bm25Index::new(self.storage.as_ref());
        bm25.remove_document(collection_id, id)?;

        let vectors = self
            .vectors
            .read()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?;
        if let Some(index) = vectors.get(&collection_id) {
            index.delete_document(id)?;
        }

        Ok(true)
    }

    // =========================================================================
    // Embedding queue
    // =========================================================================

    /// Drains up to `batch_size` pending embedding-queue rows for a
    /// collection, generating vectors via that collection's provider and
    /// inserting each into the collection's HNSW index as it completes.
    #[instrument(skip(self))]
    pub async fn process_embedding_queue(
        &self,
        collection_id: CollectionId,
        batch_size: usize,
    ) -> Result<QueueProcessResult> {
        let collection = self
            .storage
            .get_collection(collection_id)?
            .ok_or_else(|| NotFoundError::collection(collection_id))?;

        let provider = self
            .providers
            .get_provider(collection_id, &collection.provider, collection.dimension)
            .await?;

        let index = self
            .vectors
            .read()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?
            .get(&collection_id)
            .cloned();

        let max_retries = 3;
        let result = queue::process_queue(
            self.storage.as_ref(),
            provider.as_ref(),
            collection_id,
            batch_size,
            max_retries,
            |document_id, embedding| {
                if let Some(ref index) = index {
                    if let Err(e) = index.insert_document(document_id.clone(), embedding) {
                        warn!(document = %document_id, error = %e, "failed to insert embedded document into vector index");
                    }
                }
            },
        )
        .await?;

        Ok(result)
    }

    /// Returns per-status counts (`[pending, processing, completed, failed]`)
    /// for a collection's embedding queue.
    pub fn embedding_queue_status(&self, collection_id: CollectionId) -> Result<[u64; 4]> {
        queue::status_counts(self.storage.as_ref(), collection_id)
    }

    /// Deletes every queue row for a collection, discarding any pending
    /// embedding work. Returns the number of rows removed.
    pub fn clear_embedding_queue(&self, collection_id: CollectionId) -> Result<u64> {
        queue::clear(self.storage.as_ref(), collection_id, None)
    }

    /// Requeues rows stuck in `Processing` after an unclean shutdown.
    ///
    /// A crash between `claim_pending_embeddings` and the row's eventual
    /// `Completed`/`Failed` transition leaves it in `Processing` forever,
    /// since `process_queue`'s claim step only looks at `Pending` rows.
    /// Called once at [`Self::open`]; walks every collection and re-enqueues
    /// any `Processing` row as `Pending` with its attempt count preserved.
    fn recover_stuck_embeddings(&self) -> Result<()> {
        for collection in self.storage.list_collections()? {
            let requeued = self.storage.requeue_processing(collection.id)?;
            if requeued > 0 {
                warn!(collection = %collection.id, count = requeued, "requeued embedding rows stuck in Processing after restart");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Hybrid search
    // =========================================================================

    /// Runs a hybrid (FTS + vector) search against a collection and returns
    /// results joined with their document bodies.
    #[instrument(skip(self, query))]
    pub async fn search(
        &self,
        collection_id: CollectionId,
        query: &str,
        limit: usize,
        preference: ModePreference,
    ) -> Result<Vec<SearchResult>> {
        let collection = self
            .storage
            .get_collection(collection_id)?
            .ok_or_else(|| NotFoundError::collection(collection_id))?;

        let analysis = search::analyze(query);

        let vector_available = self
            .with_vector_index(collection_id, |index| Ok(index.active_count() > 0))?
            .unwrap_or(false);

        let plan = search::select_strategy(&analysis, preference, vector_available, limit);

        let query_embedding = if matches!(plan.mode, crate::search::SearchMode::SemanticOnly | crate::search::SearchMode::Hybrid)
            && vector_available
        {
            let provider = self
                .providers
                .get_provider(collection_id, &collection.provider, collection.dimension)
                .await?;
            let (embedding, _meta) = self
                .query_pipeline
                .generate_query_embedding(self.storage.clone(), collection_id, provider, query)
                .await?;
            Some(embedding)
        } else {
            None
        };

        let vector_index = self
            .vectors
            .read()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?
            .get(&collection_id)
            .cloned();
        let ef_search = self.config.vector_index.ef_search;

        let outcome = search::execute(
            &plan,
            &analysis,
            self.storage.as_ref(),
            collection_id,
            query,
            query_embedding.as_deref(),
            vector_index.as_deref(),
            ef_search,
        )
        .await?;

        let storage = self.storage.clone();
        let results = search::build_results(
            outcome.fused,
            |id| storage.get_document(collection_id, id).ok().flatten(),
            query,
            None,
        );

        Ok(results)
    }

    // =========================================================================
    // Cache management
    // =========================================================================

    /// Invalidates cache entries for a collection matching `pattern` (`"*"`,
    /// `"tag:<t>"`, or a key prefix).
    pub fn invalidate_cache(&self, collection_id: CollectionId, pattern: &str) -> Result<u64> {
        self.cache.invalidate(self.storage.as_ref(), collection_id, pattern)
    }

    /// Sweeps expired entries from the primary-database cache tier.
    pub fn sweep_cache(&self, collection_id: CollectionId) -> Result<u64> {
        self.cache.sweep_expired(self.storage.as_ref(), collection_id)
    }

    /// Evicts embedding providers idle past the configured timeout.
    pub async fn evict_idle_providers(&self) -> usize {
        self.providers.evict_idle().await
    }

    // =========================================================================
    // Backup / Restore
    // =========================================================================

    /// Serializes the entire database (every collection's documents,
    /// embeddings, FTS index, queue, and cache rows) into a byte blob.
    pub fn export(&self) -> Result<Vec<u8>> {
        self.storage.export()
    }

    /// Restores database contents from a blob produced by [`Self::export`]
    /// and rebuilds every collection's HNSW vector index from the restored
    /// embeddings, since the graph itself isn't part of the exported blob.
    pub fn import(&self, data: &[u8]) -> Result<()> {
        self.storage.import(data)?;
        let rebuilt = Self::load_all_indexes(self.storage.as_ref(), &self.config)?;
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| LocalRetrieveError::vector("Vectors lock poisoned"))?;
        *vectors = rebuilt;
        Ok(())
    }

    // =========================================================================
    // RPC method dispatch
    // =========================================================================

    /// Builds the worker-side [`MethodRegistry`] exposing this engine over
    /// the RPC surface, each method named to match the host API (`search`,
    /// `createCollection`, `insertDocumentWithEmbedding`, ...).
    ///
    /// Requires `Arc<Engine>` so handler closures can outlive the call that
    /// builds them; pair with [`Self::spawn_rpc`] to also stand up the
    /// transport loop.
    pub fn method_registry(self: &Arc<Self>) -> crate::rpc::MethodRegistry {
        use crate::rpc::handler;
        use serde_json::Value;

        let mut registry = crate::rpc::MethodRegistry::new();

        {
            let engine = self.clone();
            registry.register(
                "createCollection",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let req: CreateCollectionParams =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let id = engine
                            .create_collection(&req.name, req.provider)
                            .map_err(handler_error)?;
                        serde_json::to_value(id).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "getCollectionInfo",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let id: CollectionId =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let collection = engine.get_collection(id).map_err(handler_error)?;
                        serde_json::to_value(collection).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "getCollectionEmbeddingStatus",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let id: CollectionId =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let counts = engine.embedding_queue_status(id).map_err(handler_error)?;
                        serde_json::to_value(counts).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "insertDocumentWithEmbedding",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let doc: NewDocument =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        engine.upsert_document(doc).await.map_err(handler_error)?;
                        Ok(Value::Null)
                    }
                }),
            );
        }
        for (method, preference) in [
            ("search", ModePreference::Auto),
            ("searchSemantic", ModePreference::SemanticOnly),
            ("searchText", ModePreference::TextOnly),
            ("searchAdvanced", ModePreference::Hybrid),
        ] {
            let engine = self.clone();
            registry.register(
                method,
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let req: SearchParams =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let results = engine
                            .search(req.collection_id, &req.query, req.limit, preference)
                            .await
                            .map_err(handler_error)?;
                        serde_json::to_value(results).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "processEmbeddingQueue",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let req: ProcessQueueParams =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let result = engine
                            .process_embedding_queue(req.collection_id, req.batch_size)
                            .await
                            .map_err(handler_error)?;
                        serde_json::to_value(result).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "getQueueStatus",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let id: CollectionId =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let counts = engine.embedding_queue_status(id).map_err(handler_error)?;
                        serde_json::to_value(counts).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "clearEmbeddingQueue",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let id: CollectionId =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let removed = engine.clear_embedding_queue(id).map_err(handler_error)?;
                        serde_json::to_value(removed).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "getStats",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let id: CollectionId =
                            serde_json::from_value(params).map_err(invalid_params)?;
                        let stats = engine.get_collection_stats(id).map_err(handler_error)?;
                        serde_json::to_value(stats).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "getVersion",
                handler(move |_params: Value| {
                    let engine = engine.clone();
                    async move { serde_json::to_value(engine.metadata().schema_version).map_err(serialize_error) }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "export",
                handler(move |_params: Value| {
                    let engine = engine.clone();
                    async move {
                        let blob = engine.export().map_err(handler_error)?;
                        serde_json::to_value(blob).map_err(serialize_error)
                    }
                }),
            );
        }
        {
            let engine = self.clone();
            registry.register(
                "import",
                handler(move |params: Value| {
                    let engine = engine.clone();
                    async move {
                        let blob: Vec<u8> = serde_json::from_value(params).map_err(invalid_params)?;
                        engine.import(&blob).map_err(handler_error)?;
                        Ok(Value::Null)
                    }
                }),
            );
        }

        registry
    }

    /// Builds the method registry via [`Self::method_registry`] and spawns
    /// the RPC transport loop using `config.rpc`'s concurrency cap and
    /// per-call timeout.
    pub fn spawn_rpc(
        self: &Arc<Self>,
    ) -> (crate::rpc::RpcClient, tokio::sync::mpsc::UnboundedReceiver<crate::rpc::LogMessage>) {
        let registry = self.method_registry();
        crate::rpc::RpcTransport::spawn(
            registry,
            self.config.rpc.max_concurrent_calls,
            self.config.rpc.call_timeout,
        )
    }

    // =========================================================================
    // Test helpers
    // =========================================================================

    /// Returns a reference to the storage engine for integration testing.
    #[doc(hidden)]
    #[inline]
    pub fn storage_for_test(&self) -> &dyn StorageEngine {
        self.storage.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempdir().unwrap();
        let engine = Engine::open(dir.path().join("main.db"), Config::with_local_embeddings()).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_open_creates_empty_engine() {
        let (_dir, engine) = open_engine();
        assert!(engine.list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_create_and_get_collection() {
        let (_dir, engine) = open_engine();
        let id = engine.create_collection("docs", ProviderKind::Local).unwrap();
        let collection = engine.get_collection(id).unwrap().unwrap();
        assert_eq!(collection.name, "docs");
    }

    #[test]
    fn test_create_collection_rejects_empty_name() {
        let (_dir, engine) = open_engine();
        assert!(engine.create_collection("", ProviderKind::Local).is_err());
    }

    #[tokio::test]
    async fn test_upsert_document_with_embedding_is_immediately_searchable() {
        let (_dir, engine) = open_engine();
        let collection_id = engine.create_collection("docs", ProviderKind::External).unwrap();

        engine
            .upsert_document(NewDocument {
                id: DocumentId::new("doc-1"),
                collection_id,
                title: None,
                content: "the quick brown fox jumps over the lazy dog".to_string(),
                embedding: Some(vec![0.1; 384]),
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let results = engine
            .search(collection_id, "fox", 10, ModePreference::TextOnly)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, DocumentId::new("doc-1"));
    }

    #[tokio::test]
    async fn test_upsert_document_without_embedding_enqueues_for_local_provider() {
        let (_dir, engine) = open_engine();
        let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();

        engine
            .upsert_document(NewDocument {
                id: DocumentId::new("doc-1"),
                collection_id,
                title: None,
                content: "some content".to_string(),
                embedding: None,
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let counts = engine.embedding_queue_status(collection_id).unwrap();
        assert_eq!(counts[QueueStatus::Pending as usize], 1);

        let processed = engine.process_embedding_queue(collection_id, 10).await.unwrap();
        assert_eq!(processed.completed, 1);

        let counts = engine.embedding_queue_status(collection_id).unwrap();
        assert_eq!(counts[QueueStatus::Pending as usize], 0);
    }

    #[tokio::test]
    async fn test_upsert_document_requires_embedding_for_external_provider() {
        let (_dir, engine) = open_engine();
        let collection_id = engine.create_collection("docs", ProviderKind::External).unwrap();

        let result = engine
            .upsert_document(NewDocument {
                id: DocumentId::new("doc-1"),
                collection_id,
                title: None,
                content: "content".to_string(),
                embedding: None,
                metadata: Default::default(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_document_removes_from_fts_and_vector_index() {
        let (_dir, engine) = open_engine();
        let collection_id = engine.create_collection("docs", ProviderKind::External).unwrap();
        let id = DocumentId::new("doc-1");

        engine
            .upsert_document(NewDocument {
                id: id.clone(),
                collection_id,
                title: None,
                content: "content to delete".to_string(),
                embedding: Some(vec![0.1; 384]),
                metadata: Default::default(),
            })
            .await
            .unwrap();

        assert!(engine.delete_document(collection_id, &id).unwrap());
        assert!(engine.get_document(collection_id, &id).unwrap().is_none());

        let results = engine
            .search(collection_id, "delete", 10, ModePreference::TextOnly)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_delete_collection_cascades() {
        let (_dir, engine) = open_engine();
        let id = engine.create_collection("docs", ProviderKind::Local).unwrap();
        assert!(engine.delete_collection(id).unwrap());
        assert!(engine.get_collection(id).unwrap().is_none());
        assert!(!engine.delete_collection(id).unwrap());
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_reopen_recovers_stuck_processing_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("main.db");
        let collection_id = {
            let engine = Engine::open(&path, Config::with_local_embeddings()).unwrap();
            let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();
            engine.storage_for_test().enqueue_embedding(&crate::storage::QueueItem {
                collection_id,
                document_id: DocumentId::new("doc-1"),
                priority: 0,
                status: QueueStatus::Processing,
                attempts: 0,
                last_error: None,
                created_at: crate::types::Timestamp::now(),
                updated_at: crate::types::Timestamp::now(),
            }).unwrap();
            engine.close().unwrap();
            collection_id
        };

        let engine = Engine::open(&path, Config::with_local_embeddings()).unwrap();
        let counts = engine.embedding_queue_status(collection_id).unwrap();
        assert_eq!(counts[QueueStatus::Processing as usize], 0);
    }

    #[tokio::test]
    async fn test_rpc_create_collection_and_search_roundtrip() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(Engine::open(dir.path().join("main.db"), Config::with_local_embeddings()).unwrap());
        let (client, _logs) = engine.spawn_rpc();

        let created = client
            .call(
                "createCollection",
                serde_json::json!({"name": "docs", "provider": "Local"}),
            )
            .await
            .unwrap();
        let collection_id: CollectionId = serde_json::from_value(created).unwrap();

        let embedding = vec![0.1_f32; 384];
        client
            .call(
                "insertDocumentWithEmbedding",
                serde_json::json!({
                    "id": "doc-1",
                    "collection_id": collection_id,
                    "title": null,
                    "content": "the quick brown fox",
                    "embedding": embedding,
                    "metadata": {},
                }),
            )
            .await
            .unwrap();

        let result = client
            .call(
                "searchText",
                serde_json::json!({"collection_id": collection_id, "query": "fox"}),
            )
            .await
            .unwrap();
        let results: Vec<SearchResult> = serde_json::from_value(result).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_rpc_unknown_method_reports_unknown_method() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(Engine::open(dir.path().join("main.db"), Config::with_local_embeddings()).unwrap());
        let (client, _logs) = engine.spawn_rpc();

        let err = client.call("noSuchMethod", serde_json::Value::Null).await.unwrap_err();
        assert!(matches!(err, crate::error::RpcError::UnknownMethod(m) if m == "noSuchMethod"));
    }
}
