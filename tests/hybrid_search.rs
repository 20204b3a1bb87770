//! End-to-end integration tests for hybrid search through [`Engine`]:
//! text-only, semantic-only, and auto-selected hybrid queries over a small
//! seeded corpus.

use localretrieve::{Config, Engine, ModePreference, NewDocument, ProviderKind};
use tempfile::tempdir;

fn open_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("main.db"), Config::with_local_embeddings()).unwrap();
    (dir, engine)
}

async fn seed(engine: &Engine, collection_id: localretrieve::CollectionId) {
    let docs = [
        ("doc-fox", "the quick brown fox jumps over the lazy dog"),
        ("doc-rust", "rust provides memory safety without garbage collection"),
        ("doc-search", "vector search finds semantically similar documents"),
    ];
    for (id, content) in docs {
        engine
            .upsert_document(NewDocument {
                id: id.into(),
                collection_id,
                title: None,
                content: content.to_string(),
                embedding: Some(vec![0.1_f32; 384]),
                metadata: Default::default(),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_text_only_search_finds_lexical_match() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();
    seed(&engine, collection_id).await;

    let results = engine.search(collection_id, "quick fox", 10, ModePreference::TextOnly).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id.as_str(), "doc-fox");
}

#[tokio::test]
async fn test_semantic_only_search_returns_nearest_neighbors() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();
    seed(&engine, collection_id).await;

    let results = engine.search(collection_id, "anything", 10, ModePreference::SemanticOnly).await.unwrap();
    assert_eq!(results.len(), 3, "all three docs share the same embedding and should all be near");
}

#[tokio::test]
async fn test_auto_mode_falls_back_to_text_when_vector_index_is_empty() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();

    engine
        .upsert_document(NewDocument {
            id: "doc-fox".into(),
            collection_id,
            title: None,
            content: "the quick brown fox".to_string(),
            embedding: None,
            metadata: Default::default(),
        })
        .await
        .unwrap();

    let results = engine.search(collection_id, "quick fox", 10, ModePreference::Auto).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_search_respects_limit() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();
    seed(&engine, collection_id).await;

    let results = engine.search(collection_id, "anything", 1, ModePreference::SemanticOnly).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_search_on_unknown_collection_errors() {
    let (_dir, engine) = open_engine();
    let missing = localretrieve::CollectionId::new();
    let err = engine.search(missing, "anything", 10, ModePreference::Auto).await.unwrap_err();
    assert!(matches!(err, localretrieve::LocalRetrieveError::NotFound(_)));
}

#[tokio::test]
async fn test_deleted_document_is_excluded_from_search() {
    let (_dir, engine) = open_engine();
    let collection_id = engine.create_collection("docs", ProviderKind::Local).unwrap();
    seed(&engine, collection_id).await;

    engine.delete_document(collection_id, &localretrieve::DocumentId::new("doc-fox")).unwrap();

    let results = engine.search(collection_id, "quick fox", 10, ModePreference::TextOnly).await.unwrap();
    assert!(results.is_empty());
}
