//! HNSW vector index implementation using hnsw_rs.
//!
//! Wraps `hnsw_rs::Hnsw<f32, DistCosine>` with:
//! - Bidirectional `DocumentId` ↔ `usize` ID mapping
//! - Soft-delete via `HashSet` + filtered search
//! - JSON metadata persistence (`.hnsw.meta`)
//!
//! # Thread Safety
//!
//! The `hnsw_rs::Hnsw` graph uses `parking_lot::RwLock` internally,
//! so `insert()` takes `&self`. Our metadata (`IndexState`) is
//! protected by `std::sync::RwLock`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use hnsw_rs::prelude::*;

use crate::config::VectorIndexConfig;
use crate::error::{LocalRetrieveError, Result};
use crate::types::DocumentId;

use super::VectorIndex;

/// Newtype wrapper that bridges `&dyn Fn(&usize) -> bool` to `FilterT`.
///
/// Rust's blanket impl `impl<F: Fn(&DataId) -> bool> FilterT for F` only
/// works for concrete types. When we have a `&dyn Fn` trait object (from the
/// `VectorIndex` trait's `search_filtered` method), we can't coerce it to
/// `&dyn FilterT` directly. This wrapper implements `FilterT` by delegating
/// to the wrapped closure trait object.
struct FilterBridge<'a>(&'a (dyn Fn(&usize) -> bool + Sync));

impl FilterT for FilterBridge<'_> {
    fn hnsw_filter(&self, id: &DataId) -> bool {
        (self.0)(id)
    }
}

/// HNSW vector index backed by `hnsw_rs`.
///
/// Each collection gets its own `HnswIndex` instance, providing complete
/// data isolation between collections.
///
/// # Persistence Strategy
///
/// Metadata (ID mappings, deleted set) is persisted to a JSON `.hnsw.meta`
/// file. The graph itself is rebuilt from redb embeddings on open, because
/// `hnsw_rs::HnswIo::load_hnsw` has lifetime constraints that create
/// self-referential struct issues. The graph dump files (via `file_dump`)
/// are saved for future optimization but not currently loaded.
pub struct HnswIndex {
    /// The underlying HNSW graph. Uses `'static` lifetime because
    /// all data is heap-owned (not memory-mapped).
    hnsw: Hnsw<'static, f32, DistCosine>,

    /// Mutable metadata protected by RwLock.
    state: RwLock<IndexState>,

    /// Immutable configuration (used during save/rebuild lifecycle).
    #[allow(dead_code)]
    config: VectorIndexConfig,

    /// Embedding dimension (must match all inserted vectors).
    dimension: usize,
}

/// Internal mutable state for ID mapping and soft-deletion.
#[derive(Debug)]
struct IndexState {
    /// Forward map: DocumentId → internal usize ID.
    id_to_internal: HashMap<DocumentId, usize>,

    /// Reverse map: internal usize ID → DocumentId.
    /// Uses Vec for O(1) lookup by index.
    internal_to_id: Vec<DocumentId>,

    /// Set of soft-deleted internal IDs (excluded from search).
    deleted: HashSet<usize>,

    /// Next internal ID to assign (monotonically increasing).
    next_id: usize,
}

/// Serializable metadata for persistence.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct IndexMetadata {
    pub(crate) dimension: usize,
    pub(crate) next_id: usize,
    /// Vec of (DocumentId, internal usize ID) pairs.
    pub(crate) id_map: Vec<(String, usize)>,
    /// Deleted DocumentIds.
    ///
    /// We store the document id strings instead of internal usize IDs
    /// because internal IDs are reassigned sequentially on rebuild. Using
    /// the stable id ensures the correct documents are marked deleted
    /// after rebuild.
    pub(crate) deleted: Vec<String>,
}

impl HnswIndex {
    /// Creates a new empty HNSW index.
    ///
    /// # Arguments
    ///
    /// * `dimension` - Expected embedding dimension (validated on insert)
    /// * `config` - HNSW tuning parameters
    pub fn new(dimension: usize, config: &VectorIndexConfig) -> Self {
        let hnsw = Hnsw::new(
            config.max_nb_connection,
            config.max_elements,
            config.max_layer,
            config.ef_construction,
            DistCosine,
        );

        Self {
            hnsw,
            state: RwLock::new(IndexState {
                id_to_internal: HashMap::new(),
                internal_to_id: Vec::new(),
                deleted: HashSet::new(),
                next_id: 0,
            }),
            config: config.clone(),
            dimension,
        }
    }

    /// Inserts a document embedding into the index.
    ///
    /// Assigns a new internal usize ID and records the mapping.
    /// If the DocumentId is already present, this is a no-op.
    pub fn insert_document(&self, doc_id: DocumentId, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(LocalRetrieveError::vector(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| LocalRetrieveError::vector("Index state lock poisoned"))?;

        if state.id_to_internal.contains_key(&doc_id) {
            return Ok(());
        }

        let internal_id = state.next_id;
        state.next_id += 1;

        state.id_to_internal.insert(doc_id.clone(), internal_id);
        state.internal_to_id.push(doc_id);

        drop(state);

        self.hnsw.insert((embedding, internal_id));

        Ok(())
    }

    /// Marks a document as deleted in the index.
    ///
    /// The vector remains in the graph but is excluded from search
    /// results via filtered search. Returns Ok even if the document
    /// is not in the index (idempotent).
    pub fn delete_document(&self, doc_id: &DocumentId) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| LocalRetrieveError::vector("Index state lock poisoned"))?;

        if let Some(&internal_id) = state.id_to_internal.get(doc_id) {
            state.deleted.insert(internal_id);
        }

        Ok(())
    }

    /// Searches for the k nearest documents, excluding deleted ones.
    ///
    /// Returns `(DocumentId, distance)` pairs sorted by distance
    /// ascending (closest first). Distance is cosine distance:
    /// 0.0 = identical, 2.0 = opposite.
    pub fn search_documents(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<(DocumentId, f32)>> {
        if query.len() != self.dimension {
            return Err(LocalRetrieveError::vector(format!(
                "Query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            )));
        }

        let state = self
            .state
            .read()
            .map_err(|_| LocalRetrieveError::vector("Index state lock poisoned"))?;

        let deleted_ref = &state.deleted;
        let filter_fn = |id: &usize| -> bool { !deleted_ref.contains(id) };
        let results = if state.deleted.is_empty() {
            self.hnsw.search(query, k, ef_search)
        } else {
            self.hnsw
                .search_filter(query, k, ef_search, Some(&filter_fn))
        };

        let mapped: Vec<(DocumentId, f32)> = results
            .into_iter()
            .filter_map(|n| {
                state
                    .internal_to_id
                    .get(n.d_id)
                    .map(|doc_id| (doc_id.clone(), n.distance))
            })
            .collect();

        Ok(mapped)
    }

    /// Returns true if the given document is in the index (and not deleted).
    pub fn contains(&self, doc_id: &DocumentId) -> bool {
        let state = self.state.read().ok();
        state.is_some_and(|s| {
            s.id_to_internal
                .get(doc_id)
                .is_some_and(|id| !s.deleted.contains(id))
        })
    }

    /// Returns the number of active (non-deleted) vectors.
    pub fn active_count(&self) -> usize {
        let state = self.state.read().ok();
        state.map_or(0, |s| s.id_to_internal.len() - s.deleted.len())
    }

    /// Returns the total number of vectors (including deleted).
    pub fn total_count(&self) -> usize {
        self.hnsw.get_nb_point()
    }

    /// Restores the deleted set from persisted metadata.
    ///
    /// Called during `Engine::open()` after rebuilding the graph from redb.
    /// Accepts document ids and maps them to the current internal IDs
    /// (which may differ from the previous session's IDs after a rebuild).
    pub fn restore_deleted_set(&self, deleted_doc_ids: &[String]) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| LocalRetrieveError::vector("Index state lock poisoned"))?;
        for doc_id_str in deleted_doc_ids {
            let doc_id = DocumentId::new(doc_id_str.clone());
            if let Some(&internal_id) = state.id_to_internal.get(&doc_id) {
                state.deleted.insert(internal_id);
            }
        }
        Ok(())
    }

    /// Saves index metadata to a JSON file.
    ///
    /// Creates `{dir}/{name}.hnsw.meta` with ID mappings and deleted set.
    /// Also attempts to save the HNSW graph via `file_dump` for future
    /// optimization (graph loading is not yet implemented due to lifetime
    /// constraints in hnsw_rs).
    pub fn save_to_dir(&self, dir: &Path, name: &str) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| {
            LocalRetrieveError::vector(format!("Failed to create HNSW directory: {}", e))
        })?;

        let state = self
            .state
            .read()
            .map_err(|_| LocalRetrieveError::vector("Index state lock poisoned"))?;

        let metadata = IndexMetadata {
            dimension: self.dimension,
            next_id: state.next_id,
            id_map: state
                .id_to_internal
                .iter()
                .map(|(doc_id, &internal_id)| (doc_id.as_str().to_string(), internal_id))
                .collect(),
            deleted: state
                .deleted
                .iter()
                .filter_map(|&internal_id| {
                    state
                        .internal_to_id
                        .get(internal_id)
                        .map(|doc_id| doc_id.as_str().to_string())
                })
                .collect(),
        };

        let meta_path = dir.join(format!("{}.hnsw.meta", name));
        let json = serde_json::to_string_pretty(&metadata).map_err(|e| {
            LocalRetrieveError::vector(format!("Failed to serialize HNSW metadata: {}", e))
        })?;
        fs::write(&meta_path, json).map_err(|e| {
            LocalRetrieveError::vector(format!("Failed to write HNSW metadata: {}", e))
        })?;

        if state.id_to_internal.is_empty() {
            return Ok(());
        }
        drop(state);

        if let Err(e) = self.hnsw.file_dump(dir, name) {
            tracing::warn!(error = %e, "Failed to dump HNSW graph (non-fatal, will rebuild on next open)");
        }

        Ok(())
    }

    /// Loads index metadata from a JSON file.
    ///
    /// Returns the metadata needed to rebuild the graph. The caller must
    /// create a new `HnswIndex` and re-insert embeddings using the
    /// stored ID mappings.
    pub(crate) fn load_metadata(dir: &Path, name: &str) -> Result<Option<IndexMetadata>> {
        let meta_path = dir.join(format!("{}.hnsw.meta", name));
        if !meta_path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&meta_path)
            .map_err(|e| LocalRetrieveError::vector(format!("Failed to read HNSW metadata: {}", e)))?;
        let metadata: IndexMetadata = serde_json::from_str(&json)
            .map_err(|e| LocalRetrieveError::vector(format!("Failed to parse HNSW metadata: {}", e)))?;

        Ok(Some(metadata))
    }

    /// Rebuilds an index from a set of embeddings.
    ///
    /// Used during `Engine::open()` to reconstruct the HNSW graph
    /// from embeddings stored in redb (the source of truth).
    pub fn rebuild_from_embeddings(
        dimension: usize,
        config: &VectorIndexConfig,
        embeddings: Vec<(DocumentId, Vec<f32>)>,
    ) -> Result<Self> {
        let index = Self::new(dimension, config);

        if embeddings.is_empty() {
            return Ok(index);
        }

        let mut state = index
            .state
            .write()
            .map_err(|_| LocalRetrieveError::vector("Index state lock poisoned"))?;

        let mut batch: Vec<(&Vec<f32>, usize)> = Vec::with_capacity(embeddings.len());

        for (doc_id, embedding) in &embeddings {
            let internal_id = state.next_id;
            state.next_id += 1;
            state.id_to_internal.insert(doc_id.clone(), internal_id);
            state.internal_to_id.push(doc_id.clone());
            batch.push((embedding, internal_id));
        }

        drop(state);

        index.hnsw.parallel_insert(&batch);

        Ok(index)
    }

    /// Removes HNSW files for a collection from disk.
    pub fn remove_files(dir: &Path, name: &str) -> Result<()> {
        let meta_path = dir.join(format!("{}.hnsw.meta", name));
        if meta_path.exists() {
            fs::remove_file(&meta_path).map_err(|e| {
                LocalRetrieveError::vector(format!("Failed to remove HNSW metadata: {}", e))
            })?;
        }

        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let file_str = file_name.to_string_lossy();
                if file_str.starts_with(name) && file_str.contains("hnswdump") {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        Ok(())
    }
}

// ==========================================================================
// VectorIndex trait implementation
// ==========================================================================

impl VectorIndex for HnswIndex {
    fn insert(&self, id: usize, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(LocalRetrieveError::vector(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }
        self.hnsw.insert((embedding, id));
        Ok(())
    }

    fn insert_batch(&self, items: &[(&Vec<f32>, usize)]) -> Result<()> {
        self.hnsw.parallel_insert(items);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(usize, f32)>> {
        let results = self.hnsw.search(query, k, ef_search);
        Ok(results.into_iter().map(|n| (n.d_id, n.distance)).collect())
    }

    fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        filter: &(dyn Fn(&usize) -> bool + Sync),
    ) -> Result<Vec<(usize, f32)>> {
        let bridge = FilterBridge(filter);
        let results = self.hnsw.search_filter(query, k, ef_search, Some(&bridge));
        Ok(results.into_iter().map(|n| (n.d_id, n.distance)).collect())
    }

    fn delete(&self, id: usize) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| LocalRetrieveError::vector("Index state lock poisoned"))?;
        state.deleted.insert(id);
        Ok(())
    }

    fn is_deleted(&self, id: usize) -> bool {
        self.state
            .read()
            .ok()
            .is_some_and(|s| s.deleted.contains(&id))
    }

    fn len(&self) -> usize {
        self.active_count()
    }

    fn save(&self, dir: &Path, name: &str) -> Result<()> {
        self.save_to_dir(dir, name)
    }
}

// ==========================================================================
// Tests
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> VectorIndexConfig {
        VectorIndexConfig {
            max_nb_connection: 16,
            ef_construction: 100,
            ef_search: 50,
            max_layer: 8,
            max_elements: 1000,
        }
    }

    /// Generates a deterministic embedding from a seed.
    /// Vectors with close seeds produce similar embeddings.
    fn make_embedding(seed: u64, dim: usize) -> Vec<f32> {
        (0..dim)
            .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
            .collect()
    }

    #[test]
    fn test_new_index_is_empty() {
        let index = HnswIndex::new(384, &test_config());
        assert_eq!(index.active_count(), 0);
        assert_eq!(index.total_count(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_and_search() {
        let dim = 8;
        let config = test_config();
        let index = HnswIndex::new(dim, &config);

        for i in 0..10u64 {
            let doc_id = DocumentId::new(format!("doc-{i}"));
            let embedding = make_embedding(i, dim);
            index.insert_document(doc_id, &embedding).unwrap();
        }

        assert_eq!(index.active_count(), 10);

        let query = make_embedding(5, dim);
        let results = index.search_documents(&query, 3, 50).unwrap();

        assert!(!results.is_empty());
        assert!(results.len() <= 3);
        for w in results.windows(2) {
            assert!(w[0].1 <= w[1].1, "Results not sorted by distance");
        }
    }

    #[test]
    fn test_soft_delete_excludes_from_search() {
        let dim = 8;
        let index = HnswIndex::new(dim, &test_config());
        let target = DocumentId::new("target");
        index
            .insert_document(target.clone(), &make_embedding(5, dim))
            .unwrap();
        for i in 0..5u64 {
            index
                .insert_document(DocumentId::new(format!("other-{i}")), &make_embedding(i, dim))
                .unwrap();
        }

        index.delete_document(&target).unwrap();
        assert!(!index.contains(&target));
        assert_eq!(index.active_count(), 5);

        let results = index.search_documents(&make_embedding(5, dim), 10, 50).unwrap();
        assert!(results.iter().all(|(id, _)| id != &target));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = HnswIndex::new(8, &test_config());
        let err = index.insert_document(DocumentId::new("a"), &[0.0; 4]);
        assert!(err.is_err());
    }

    #[test]
    fn test_rebuild_from_embeddings() {
        let dim = 8;
        let embeddings: Vec<(DocumentId, Vec<f32>)> = (0..5u64)
            .map(|i| (DocumentId::new(format!("doc-{i}")), make_embedding(i, dim)))
            .collect();
        let index = HnswIndex::rebuild_from_embeddings(dim, &test_config(), embeddings).unwrap();
        assert_eq!(index.active_count(), 5);
        assert!(index.contains(&DocumentId::new("doc-0")));
    }

    #[test]
    fn test_restore_deleted_set() {
        let dim = 8;
        let index = HnswIndex::new(dim, &test_config());
        index
            .insert_document(DocumentId::new("doc-1"), &make_embedding(1, dim))
            .unwrap();
        index
            .restore_deleted_set(&["doc-1".to_string()])
            .unwrap();
        assert!(!index.contains(&DocumentId::new("doc-1")));
    }
}
