//! Runs a [`SearchPlan`] against the storage and vector indices and
//! returns fused results.

use std::time::Instant;

use serde::Serialize;

use crate::error::Result;
use crate::fts::Bm25Index;
use crate::storage::StorageEngine;
use crate::types::CollectionId;
use crate::vector::HnswIndex;

use super::analyzer::{QueryAnalysis, SearchMode, SearchPlan, Strategy};
use super::fusion::{fuse, LegResult, ResultSource};

/// Per-phase timing breakdown, useful for `getStats`/debug responses.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PhaseTimings {
    pub fts_ms: u64,
    pub vector_ms: u64,
    pub fusion_ms: u64,
}

/// Diagnostic bundle returned alongside search results when a caller asks
/// for it (the RPC `searchAdvanced` method's `debug: true` option).
#[derive(Clone, Debug, Serialize)]
pub struct DebugInfo {
    #[serde(skip)]
    pub analysis: QueryAnalysis,
    pub mode: SearchMode,
    pub phase_timings: PhaseTimings,
    pub warnings: Vec<String>,
}

/// Fused search results plus execution diagnostics.
pub struct ExecutionOutcome {
    pub fused: Vec<super::fusion::FusedResult>,
    pub debug: DebugInfo,
}

/// Executes a [`SearchPlan`]: runs the FTS and/or vector legs the plan
/// calls for (concurrently when both run) and fuses them.
pub async fn execute(
    plan: &SearchPlan,
    analysis: &QueryAnalysis,
    storage: &dyn StorageEngine,
    collection_id: CollectionId,
    query: &str,
    query_embedding: Option<&[f32]>,
    vector_index: Option<&HnswIndex>,
    ef_search: usize,
) -> Result<ExecutionOutcome> {
    let mut warnings = Vec::new();
    let mut timings = PhaseTimings::default();

    let run_fts = matches!(plan.mode, SearchMode::TextOnly | SearchMode::Hybrid);
    let run_vector = matches!(plan.mode, SearchMode::SemanticOnly | SearchMode::Hybrid)
        && vector_index.is_some()
        && query_embedding.is_some();

    if matches!(plan.mode, SearchMode::SemanticOnly | SearchMode::Hybrid) && !run_vector {
        warnings.push("vector leg skipped: no vector index or query embedding available".to_string());
    }

    let fts_fut = async {
        if !run_fts {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let bm25 = Bm25Index::new(storage);
        let result = bm25.search_with_strategy(collection_id, query, plan.limit, plan.strategy);
        (result, start.elapsed())
    };

    let vector_fut = async {
        if !run_vector {
            return (Ok(Vec::new()), std::time::Duration::ZERO);
        }
        let start = Instant::now();
        let index = vector_index.expect("checked by run_vector");
        let embedding = query_embedding.expect("checked by run_vector");
        let result = index.search_documents(embedding, plan.limit, ef_search);
        (result, start.elapsed())
    };

    let ((fts_result, fts_elapsed), (vector_result, vector_elapsed)) =
        tokio::join!(fts_fut, vector_fut);

    timings.fts_ms = fts_elapsed.as_millis() as u64;
    timings.vector_ms = vector_elapsed.as_millis() as u64;

    let fts_hits: Vec<LegResult> = fts_result?
        .into_iter()
        .map(|(document_id, score)| LegResult { document_id, score })
        .collect();

    // HNSW returns cosine *distance* (lower is better); invert so fusion's
    // higher-is-better assumption holds for both legs.
    let vector_hits: Vec<LegResult> = vector_result?
        .into_iter()
        .map(|(document_id, distance)| LegResult { document_id, score: 1.0 - distance })
        .collect();

    let fusion_start = Instant::now();
    let fused = match plan.mode {
        SearchMode::TextOnly => fts_hits.into_iter().map(|r| to_fused(r, ResultSource::Fts)).collect(),
        SearchMode::SemanticOnly => {
            vector_hits.into_iter().map(|r| to_fused(r, ResultSource::Vector)).collect()
        }
        SearchMode::Hybrid => fuse(&fts_hits, &vector_hits, &plan.fusion),
    };
    timings.fusion_ms = fusion_start.elapsed().as_millis() as u64;

    let fused: Vec<_> = fused.into_iter().take(plan.limit).collect();

    Ok(ExecutionOutcome {
        fused,
        debug: DebugInfo {
            analysis: analysis.clone(),
            mode: plan.mode,
            phase_timings: timings,
            warnings,
        },
    })
}

fn to_fused(result: LegResult, source: ResultSource) -> super::fusion::FusedResult {
    let (fts_score, vec_score) = match source {
        ResultSource::Fts => (Some(result.score), None),
        ResultSource::Vector => (None, Some(result.score)),
        ResultSource::Both => (Some(result.score), Some(result.score)),
    };
    super::fusion::FusedResult { document_id: result.document_id, score: result.score, source, fts_score, vec_score }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::document::Document;
    use crate::storage::RedbStorage;
    use crate::types::{DocumentId, Timestamp};
    use serde_json::Map;
    use tempfile::tempdir;

    fn storage_with_doc(content: &str) -> (tempfile::TempDir, RedbStorage, CollectionId) {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("main.db"), &Config::default()).unwrap();
        let collection_id = CollectionId::new();
        let document = Document {
            id: DocumentId::new("doc-1"),
            collection_id,
            title: None,
            content: content.to_string(),
            embedding: Vec::new(),
            metadata: Map::new(),
            timestamp: Timestamp::now(),
        };
        storage.save_document(&document).unwrap();
        let bm25 = Bm25Index::new(&storage);
        bm25.index_document(collection_id, &document.id, content).unwrap();
        (dir, storage, collection_id)
    }

    #[tokio::test]
    async fn test_execute_text_only_returns_fts_hits() {
        let (_dir, storage, collection_id) = storage_with_doc("the quick brown fox");
        let analysis = super::super::analyzer::analyze("fox");
        let plan = SearchPlan {
            mode: SearchMode::TextOnly,
            strategy: Strategy::Keyword,
            limit: 10,
            fusion: Default::default(),
        };

        let outcome = execute(&plan, &analysis, &storage, collection_id, "fox", None, None, 50)
            .await
            .unwrap();
        assert_eq!(outcome.fused.len(), 1);
        assert_eq!(outcome.fused[0].document_id, DocumentId::new("doc-1"));
    }

    #[tokio::test]
    async fn test_execute_semantic_only_without_index_warns_and_is_empty() {
        let (_dir, storage, collection_id) = storage_with_doc("content");
        let analysis = super::super::analyzer::analyze("content");
        let plan = SearchPlan {
            mode: SearchMode::SemanticOnly,
            strategy: Strategy::Semantic,
            limit: 10,
            fusion: Default::default(),
        };

        let outcome = execute(&plan, &analysis, &storage, collection_id, "content", None, None, 50)
            .await
            .unwrap();
        assert!(outcome.fused.is_empty());
        assert!(!outcome.debug.warnings.is_empty());
    }
}
