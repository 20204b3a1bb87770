//! Integration tests for the durable embedding queue as driven through
//! [`Engine`]: documents inserted without a pre-computed embedding are
//! queued, `process_embedding_queue` drains them using the collection's
//! provider, and the resulting vectors become searchable.

use localretrieve::{Config, Engine, ModePreference, NewDocument, ProviderKind};
use tempfile::tempdir;

fn open_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("main.db"), Config::with_local_embeddings()).unwrap();
    (dir, engine)
}

#[tokio::test]
async fn test_document_without_embedding_is_queued_pending() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();

    engine
        .upsert_document(NewDocument {
            id: "doc-1".into(),
            collection_id,
            title: None,
            content: "the quick brown fox".to_string(),
            embedding: None,
            metadata: Default::default(),
        })
        .await
        .unwrap();

    let counts = engine.embedding_queue_status(collection_id).unwrap();
    assert_eq!(counts[0], 1, "one pending row expected");
}

#[tokio::test]
async fn test_process_embedding_queue_makes_document_searchable_semantically() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();

    engine
        .upsert_document(NewDocument {
            id: "doc-1".into(),
            collection_id,
            title: None,
            content: "the quick brown fox jumps over the lazy dog".to_string(),
            embedding: None,
            metadata: Default::default(),
        })
        .await
        .unwrap();

    let result = engine.process_embedding_queue(collection_id, 10).await.unwrap();
    assert_eq!(result.completed, 1);
    assert_eq!(result.failed, 0);

    let counts = engine.embedding_queue_status(collection_id).unwrap();
    assert_eq!(counts, [0, 0, 1, 0], "queue row moved to completed");

    let results = engine
        .search(collection_id, "quick fox", 10, ModePreference::SemanticOnly)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id.as_str(), "doc-1");
}

#[tokio::test]
async fn test_clear_embedding_queue_removes_pending_rows() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();

    engine
        .upsert_document(NewDocument {
            id: "doc-1".into(),
            collection_id,
            title: None,
            content: "content".to_string(),
            embedding: None,
            metadata: Default::default(),
        })
        .await
        .unwrap();

    let removed = engine.clear_embedding_queue(collection_id).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(engine.embedding_queue_status(collection_id).unwrap(), [0, 0, 0, 0]);
}

#[tokio::test]
async fn test_external_provider_requires_embedding_up_front() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::External).unwrap();

    let err = engine
        .upsert_document(NewDocument {
            id: "doc-1".into(),
            collection_id,
            title: None,
            content: "content".to_string(),
            embedding: None,
            metadata: Default::default(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, localretrieve::LocalRetrieveError::Validation(_)));
}
