//! Durable embedding queue: upsert-by-`(collection, document)` rows that
//! record pending embedding work so `insertDocumentWithEmbedding` can return
//! before a slow provider call finishes.
//!
//! This module owns no state of its own — every row lives in the storage
//! layer's `EMBEDDING_QUEUE_TABLE`, claimed and drained by
//! [`process_queue`]. A crash mid-process leaves the claimed row in
//! `Processing`; the next `process_queue` call's claim step only looks at
//! `Pending` rows, so a stuck `Processing` row needs an explicit re-enqueue
//! (not handled automatically here — see `Engine::recover_stuck_embeddings`
//! in the engine module for the startup sweep).

use serde::Serialize;
use tracing::warn;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::storage::{QueueItem, QueueStatus, StorageEngine};
use crate::types::{CollectionId, DocumentId, Timestamp};

/// Outcome of one `process_queue` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueProcessResult {
    /// Rows whose embedding was generated and committed.
    pub completed: u64,
    /// Rows that exhausted `max_retries` and were marked `Failed`.
    pub failed: u64,
    /// Rows that errored but were re-enqueued as `Pending` for another try.
    pub retried: u64,
}

impl QueueProcessResult {
    fn record_success(&mut self) {
        self.completed += 1;
    }
    fn record_failure(&mut self) {
        self.failed += 1;
    }
    fn record_retry(&mut self) {
        self.retried += 1;
    }
}

/// Claims up to `batch_size` pending rows for `collection_id` and drains
/// them: for each row, calls `provider.embed` on the document's content and,
/// on success, atomically writes the vector and flips the row to
/// `Completed` ([`StorageEngine::complete_embedding_with_vector`]).
///
/// A document deleted after being queued is treated as a permanent failure
/// (no retry — there's nothing left to embed). A provider error below
/// `max_retries` re-enqueues the row as `Pending` with `attempts`
/// incremented; at or above `max_retries` the row is marked `Failed`.
///
/// `on_embedded` is invoked after each successful commit so the caller can
/// insert the vector into its in-memory HNSW index (which, unlike storage,
/// isn't reachable from this module).
pub async fn process_queue(
    storage: &dyn StorageEngine,
    provider: &dyn EmbeddingProvider,
    collection_id: CollectionId,
    batch_size: usize,
    max_retries: u32,
    mut on_embedded: impl FnMut(&DocumentId, &[f32]),
) -> Result<QueueProcessResult> {
    let claimed = storage.claim_pending_embeddings(collection_id, batch_size)?;
    let mut result = QueueProcessResult::default();

    for item in claimed {
        let Some(document) = storage.get_document(collection_id, &item.document_id)? else {
            storage.fail_embedding(collection_id, &item.document_id, "document no longer exists")?;
            result.record_failure();
            continue;
        };

        match provider.embed(&document.content).await {
            Ok(embedding) => {
                if let Err(e) = provider.validate_embedding(&embedding) {
                    handle_failure(storage, collection_id, &item, max_retries, &e.to_string(), &mut result)?;
                    continue;
                }
                storage.complete_embedding_with_vector(collection_id, &item.document_id, &embedding)?;
                on_embedded(&item.document_id, &embedding);
                result.record_success();
            }
            Err(e) => {
                handle_failure(storage, collection_id, &item, max_retries, &e.to_string(), &mut result)?;
            }
        }
    }

    Ok(result)
}

fn handle_failure(
    storage: &dyn StorageEngine,
    collection_id: CollectionId,
    item: &QueueItem,
    max_retries: u32,
    error: &str,
    result: &mut QueueProcessResult,
) -> Result<()> {
    if item.attempts >= max_retries {
        storage.fail_embedding(collection_id, &item.document_id, error)?;
        result.record_failure();
        warn!(%collection_id, document = %item.document_id, attempts = item.attempts, "embedding permanently failed");
        return Ok(());
    }

    let retry_item = QueueItem {
        collection_id,
        document_id: item.document_id.clone(),
        priority: item.priority,
        status: QueueStatus::Pending,
        attempts: item.attempts.saturating_add(1),
        last_error: Some(error.to_string()),
        created_at: item.created_at,
        updated_at: Timestamp::now(),
    };
    storage.enqueue_embedding(&retry_item)?;
    result.record_retry();
    Ok(())
}

/// Enqueues (or replaces) a pending embedding row for `document_id`.
pub fn enqueue(
    storage: &dyn StorageEngine,
    collection_id: CollectionId,
    document_id: DocumentId,
    priority: i32,
) -> Result<()> {
    let now = Timestamp::now();
    storage.enqueue_embedding(&QueueItem {
        collection_id,
        document_id,
        priority,
        status: QueueStatus::Pending,
        attempts: 0,
        last_error: None,
        created_at: now,
        updated_at: now,
    })
}

/// Returns per-status counts (`[pending, processing, completed, failed]`).
pub fn status_counts(storage: &dyn StorageEngine, collection_id: CollectionId) -> Result<[u64; 4]> {
    storage.queue_status_counts(collection_id)
}

/// Deletes queue rows matching `status` (or all rows if `None`).
pub fn clear(
    storage: &dyn StorageEngine,
    collection_id: CollectionId,
    status: Option<QueueStatus>,
) -> Result<u64> {
    storage.clear_queue(collection_id, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::LocalEmbeddingProvider;
    use crate::storage::RedbStorage;
    use crate::types::CollectionId;
    use serde_json::Map;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, RedbStorage, CollectionId) {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let collection_id = CollectionId::new();
        (dir, storage, collection_id)
    }

    fn insert_doc(storage: &RedbStorage, collection_id: CollectionId, id: &str) {
        use crate::document::Document;
        let doc = Document {
            id: DocumentId::new(id),
            collection_id,
            title: None,
            content: format!("content for {id}"),
            embedding: Vec::new(),
            metadata: Map::new(),
            timestamp: Timestamp::now(),
        };
        storage.save_document(&doc).unwrap();
    }

    #[tokio::test]
    async fn test_process_queue_completes_and_invokes_callback() {
        let (_dir, storage, collection_id) = setup();
        insert_doc(&storage, collection_id, "doc-1");
        enqueue(&storage, collection_id, DocumentId::new("doc-1"), 0).unwrap();

        let provider = LocalEmbeddingProvider::new(384, &Default::default());
        let mut seen = Vec::new();
        let result = process_queue(&storage, &provider, collection_id, 10, 3, |id, embedding| {
            seen.push((id.clone(), embedding.len()));
        })
        .await
        .unwrap();

        assert_eq!(result.completed, 1);
        assert_eq!(seen.len(), 1);
        assert_eq!(storage.get_embedding(collection_id, &DocumentId::new("doc-1")).unwrap().unwrap().len(), 384);
    }

    #[tokio::test]
    async fn test_process_queue_fails_permanently_for_missing_document() {
        let (_dir, storage, collection_id) = setup();
        enqueue(&storage, collection_id, DocumentId::new("ghost"), 0).unwrap();

        let provider = LocalEmbeddingProvider::new(384, &Default::default());
        let result = process_queue(&storage, &provider, collection_id, 10, 3, |_, _| {})
            .await
            .unwrap();

        assert_eq!(result.failed, 1);
        let counts = status_counts(&storage, collection_id).unwrap();
        assert_eq!(counts[QueueStatus::Failed as usize], 1);
    }

    #[tokio::test]
    async fn test_status_counts_reflect_pending_rows() {
        let (_dir, storage, collection_id) = setup();
        insert_doc(&storage, collection_id, "doc-1");
        enqueue(&storage, collection_id, DocumentId::new("doc-1"), 0).unwrap();

        let counts = status_counts(&storage, collection_id).unwrap();
        assert_eq!(counts[QueueStatus::Pending as usize], 1);
    }

    #[tokio::test]
    async fn test_clear_removes_rows() {
        let (_dir, storage, collection_id) = setup();
        insert_doc(&storage, collection_id, "doc-1");
        enqueue(&storage, collection_id, DocumentId::new("doc-1"), 0).unwrap();

        let removed = clear(&storage, collection_id, None).unwrap();
        assert_eq!(removed, 1);
        let counts = status_counts(&storage, collection_id).unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 0);
    }
}
