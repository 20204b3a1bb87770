//! Benchmarks for the hybrid search pipeline: document ingestion plus
//! text/semantic/hybrid query latency.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use localretrieve::{Config, Engine, ModePreference, NewDocument, ProviderKind};
use tempfile::tempdir;

const CORPUS: &[&str] = &[
    "the quick brown fox jumps over the lazy dog",
    "rust provides memory safety without garbage collection",
    "vector search finds semantically similar documents",
    "full text search ranks documents by term frequency",
    "hybrid search combines lexical and semantic signals",
    "the embedding queue retries failed jobs with backoff",
    "a three tier cache keeps hot embeddings in memory",
    "redb stores collections in a single embedded database file",
    "hnsw approximates nearest neighbor search over vectors",
    "bm25 scores documents using term frequency and length",
];

fn seed_engine(doc_count: usize) -> (tempfile::TempDir, Engine, localretrieve::CollectionId) {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("bench.db"), Config::with_local_embeddings()).unwrap();
    let collection_id = engine.create_collection("bench", ProviderKind::Local).unwrap();

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        for i in 0..doc_count {
            let text = CORPUS[i % CORPUS.len()];
            let embedding = vec![((i % 97) as f32) / 97.0; 384];
            engine
                .upsert_document(NewDocument {
                    id: format!("doc-{i}"),
                    collection_id,
                    title: None,
                    content: text.to_string(),
                    embedding: Some(embedding),
                    metadata: Default::default(),
                })
                .await
                .unwrap();
        }
    });

    (dir, engine, collection_id)
}

fn bench_insert_document(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("upsert_document", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let engine = Engine::open(dir.path().join("bench.db"), Config::with_local_embeddings()).unwrap();
                let collection_id = engine.create_collection("bench", ProviderKind::Local).unwrap();
                (dir, engine, collection_id)
            },
            |(_dir, engine, collection_id)| {
                rt.block_on(async {
                    engine
                        .upsert_document(NewDocument {
                            id: "doc-0".to_string(),
                            collection_id,
                            title: None,
                            content: CORPUS[0].to_string(),
                            embedding: Some(vec![0.5_f32; 384]),
                            metadata: Default::default(),
                        })
                        .await
                        .unwrap();
                });
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_search_text(c: &mut Criterion) {
    let (_dir, engine, collection_id) = seed_engine(200);
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("search_text_only", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .search(collection_id, "hybrid search", 10, ModePreference::TextOnly)
                    .await
                    .unwrap()
            })
        });
    });
}

fn bench_search_semantic(c: &mut Criterion) {
    let (_dir, engine, collection_id) = seed_engine(200);
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("search_semantic_only", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .search(collection_id, "hybrid search", 10, ModePreference::SemanticOnly)
                    .await
                    .unwrap()
            })
        });
    });
}

fn bench_search_hybrid(c: &mut Criterion) {
    let (_dir, engine, collection_id) = seed_engine(200);
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("search_hybrid_auto", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.search(collection_id, "hybrid search", 10, ModePreference::Auto).await.unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_insert_document,
    bench_search_text,
    bench_search_semantic,
    bench_search_hybrid
);
criterion_main!(benches);
