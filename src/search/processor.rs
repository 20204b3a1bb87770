//! Post-fusion result processing: snippet generation, highlighting, and
//! optional reranking before results cross the RPC boundary.

use serde::Serialize;

use crate::document::Document;
use crate::fts::tokenize;

use super::fusion::FusedResult;

/// Maximum snippet length in characters.
const SNIPPET_MAX_LEN: usize = 240;

/// A fused result joined with its document content, ready for display.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
    /// Raw FTS (BM25) score, present when this document matched the FTS leg.
    pub fts_score: Option<f32>,
    /// Raw vector-leg score, present when this document matched the vector leg.
    pub vec_score: Option<f32>,
    pub snippet: String,
    pub highlighted_terms: Vec<String>,
}

/// A hook that may reorder or drop results after fusion, e.g. an
/// application-supplied reranker. Receives the fused list in place.
pub type Reranker = dyn Fn(&mut Vec<SearchResult>) + Send + Sync;

/// Joins fused results with their document bodies and generates a snippet
/// around the densest concentration of query terms. `query` is the raw
/// (untokenized) query text used to compute which terms to highlight.
pub fn build_results(
    fused: Vec<FusedResult>,
    documents: impl Fn(&crate::types::DocumentId) -> Option<Document>,
    query: &str,
    reranker: Option<&Reranker>,
) -> Vec<SearchResult> {
    let query_terms = tokenize(query);

    let mut results: Vec<SearchResult> = fused
        .into_iter()
        .filter_map(|fused| {
            let document = documents(&fused.document_id)?;
            let snippet = make_snippet(&document.content, &query_terms);
            Some(SearchResult {
                score: fused.score,
                fts_score: fused.fts_score,
                vec_score: fused.vec_score,
                snippet,
                highlighted_terms: query_terms.clone(),
                document,
            })
        })
        .collect();

    if let Some(reranker) = reranker {
        reranker(&mut results);
    }

    results
}

/// Finds the window of `SNIPPET_MAX_LEN` characters around the first
/// occurrence of any query term (case-insensitive), falling back to the
/// document's start if no term is found.
fn make_snippet(content: &str, query_terms: &[String]) -> String {
    let lower = content.to_lowercase();
    let hit_offset = query_terms
        .iter()
        .filter_map(|term| lower.find(term.as_str()))
        .min();

    let chars: Vec<char> = content.chars().collect();
    let start_char = hit_offset
        .map(|byte_offset| lower[..byte_offset].chars().count())
        .map(|char_offset| char_offset.saturating_sub(SNIPPET_MAX_LEN / 4))
        .unwrap_or(0);

    let end_char = (start_char + SNIPPET_MAX_LEN).min(chars.len());
    let snippet: String = chars[start_char..end_char].iter().collect();

    if end_char < chars.len() {
        format!("{snippet}…")
    } else {
        snippet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionId, DocumentId, Timestamp};
    use serde_json::Map;

    fn doc(id: &str, content: &str) -> Document {
        Document {
            id: DocumentId::new(id),
            collection_id: CollectionId::new(),
            title: None,
            content: content.to_string(),
            embedding: Vec::new(),
            metadata: Map::new(),
            timestamp: Timestamp::now(),
        }
    }

    #[test]
    fn test_build_results_joins_documents() {
        let fused = vec![FusedResult {
            document_id: DocumentId::new("a"),
            score: 1.0,
            source: crate::search::fusion::ResultSource::Fts,
            fts_score: Some(1.0),
            vec_score: None,
        }];
        let document = doc("a", "the quick brown fox jumps over the lazy dog");
        let results = build_results(fused, |_| Some(document.clone()), "fox", None);
        assert_eq!(results.len(), 1);
        assert!(results[0].snippet.contains("fox"));
    }

    #[test]
    fn test_build_results_skips_missing_documents() {
        let fused = vec![FusedResult {
            document_id: DocumentId::new("missing"),
            score: 1.0,
            source: crate::search::fusion::ResultSource::Vector,
            fts_score: None,
            vec_score: Some(1.0),
        }];
        let results = build_results(fused, |_| None, "anything", None);
        assert!(results.is_empty());
    }

    #[test]
    fn test_snippet_truncates_long_content() {
        let long_content = "word ".repeat(200);
        let snippet = make_snippet(&long_content, &["word".to_string()]);
        assert!(snippet.chars().count() <= SNIPPET_MAX_LEN + 1);
    }

    #[test]
    fn test_reranker_hook_can_reorder_results() {
        let fused = vec![
            FusedResult {
                document_id: DocumentId::new("a"),
                score: 1.0,
                source: crate::search::fusion::ResultSource::Fts,
                fts_score: Some(1.0),
                vec_score: None,
            },
            FusedResult {
                document_id: DocumentId::new("b"),
                score: 0.5,
                source: crate::search::fusion::ResultSource::Fts,
                fts_score: Some(0.5),
                vec_score: None,
            },
        ];
        let a = doc("a", "alpha content");
        let b = doc("b", "beta content");
        let reranker: &Reranker = &|results: &mut Vec<SearchResult>| results.reverse();
        let results = build_results(
            fused,
            move |id| if id.as_str() == "a" { Some(a.clone()) } else { Some(b.clone()) },
            "content",
            Some(reranker),
        );
        assert_eq!(results[0].document.id, DocumentId::new("b"));
    }
}
