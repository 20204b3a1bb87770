//! BM25 ranking over the storage layer's inverted index.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::search::Strategy;
use crate::storage::{PostingsList, StorageEngine};
use crate::types::{CollectionId, DocumentId};

use super::tokenizer::{term_frequencies, tokenize};

/// Term frequency saturation parameter. Higher values let repeated terms
/// keep contributing to the score for longer before saturating.
const K1: f32 = 1.2;

/// Length normalization parameter. `0.0` disables length normalization
/// entirely, `1.0` fully normalizes by document length.
const B: f32 = 0.75;

/// A stateless BM25 scorer over a [`StorageEngine`]'s FTS tables.
///
/// Holds no index state of its own; every posting, document length, and
/// corpus statistic is read live from storage, so indexing and search
/// always observe the same committed state.
pub struct Bm25Index<'s> {
    storage: &'s dyn StorageEngine,
}

impl<'s> Bm25Index<'s> {
    /// Creates a scorer backed by the given storage engine.
    pub fn new(storage: &'s dyn StorageEngine) -> Self {
        Self { storage }
    }

    /// Tokenizes `content` and replaces the document's postings.
    pub fn index_document(
        &self,
        collection_id: CollectionId,
        id: &DocumentId,
        content: &str,
    ) -> Result<()> {
        let tokens = tokenize(content);
        let frequencies = term_frequencies(&tokens);
        self.storage
            .index_document_terms(collection_id, id, &frequencies, tokens.len() as u32)
    }

    /// Removes a document's postings entirely (on delete).
    pub fn remove_document(&self, collection_id: CollectionId, id: &DocumentId) -> Result<()> {
        self.storage.remove_document_terms(collection_id, id)
    }

    /// Scores and ranks documents against a free-text query using plain
    /// OR-matched keyword semantics. Equivalent to
    /// `search_with_strategy(.., Strategy::Keyword)`.
    pub fn search(
        &self,
        collection_id: CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(DocumentId, f32)>> {
        self.search_with_strategy(collection_id, query, k, Strategy::Keyword)
    }

    /// Scores and ranks documents against `query`, reading its structural
    /// markers (quotes, `AND`/`OR`/`NOT`, trailing `*`/`~`) according to
    /// `strategy` rather than re-detecting them here — the raw string must
    /// already have been classified before tokenization, which would
    /// otherwise strip every one of those markers.
    ///
    /// Returns up to `k` `(document_id, score)` pairs sorted by score
    /// descending. Documents matching no query term never appear, which
    /// keeps this usable directly as one leg of hybrid search fusion.
    pub fn search_with_strategy(
        &self,
        collection_id: CollectionId,
        query: &str,
        k: usize,
        strategy: Strategy,
    ) -> Result<Vec<(DocumentId, f32)>> {
        match strategy {
            Strategy::Phrase => self.search_phrase(collection_id, query, k),
            Strategy::Boolean => self.search_boolean(collection_id, query, k),
            Strategy::Fuzzy => self.search_fuzzy(collection_id, query, k),
            Strategy::Keyword | Strategy::Semantic | Strategy::Hybrid => {
                self.search_keyword(collection_id, query, k)
            }
        }
    }

    /// Plain bag-of-words OR match: every document containing at least one
    /// query term is scored and ranked.
    fn search_keyword(
        &self,
        collection_id: CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(DocumentId, f32)>> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let scores = self.score_terms(collection_id, &query_terms)?;
        Ok(Self::rank(scores, k))
    }

    /// Quote-wrapped query: approximated as "every term present", since
    /// postings carry no term positions to check adjacency against.
    fn search_phrase(
        &self,
        collection_id: CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(DocumentId, f32)>> {
        let inner = query.trim().trim_matches('"');
        let terms = tokenize(inner);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut scores = self.score_terms(collection_id, &terms)?;
        for term in &terms {
            let present = self.doc_ids_for_term(collection_id, term)?;
            scores.retain(|doc_id, _| present.contains(doc_id));
        }
        Ok(Self::rank(scores, k))
    }

    /// `AND`/`OR`/`NOT` query: `AND` terms must all be present, `NOT` terms
    /// must all be absent, everything else is OR-matched as usual.
    fn search_boolean(
        &self,
        collection_id: CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(DocumentId, f32)>> {
        let mut must = Vec::new();
        let mut must_not = Vec::new();
        let mut should = Vec::new();
        let mut require_next = false;
        let mut negate_next = false;

        for word in query.split_whitespace() {
            match word {
                "AND" => {
                    require_next = true;
                    continue;
                }
                "OR" => {
                    require_next = false;
                    negate_next = false;
                    continue;
                }
                "NOT" => {
                    negate_next = true;
                    continue;
                }
                _ => {}
            }
            let Some(term) = tokenize(word).into_iter().next() else {
                require_next = false;
                negate_next = false;
                continue;
            };
            if negate_next {
                must_not.push(term);
            } else if require_next {
                must.push(term);
            } else {
                should.push(term);
            }
            require_next = false;
            negate_next = false;
        }

        if must.is_empty() && should.is_empty() {
            return Ok(Vec::new());
        }

        let scoring_terms: Vec<String> = should.iter().chain(must.iter()).cloned().collect();
        let mut scores = self.score_terms(collection_id, &scoring_terms)?;
        for term in &must {
            let present = self.doc_ids_for_term(collection_id, term)?;
            scores.retain(|doc_id, _| present.contains(doc_id));
        }
        for term in &must_not {
            let present = self.doc_ids_for_term(collection_id, term)?;
            scores.retain(|doc_id, _| !present.contains(doc_id));
        }
        Ok(Self::rank(scores, k))
    }

    /// Trailing-`*`/`~` query: each wildcarded token expands to every term
    /// sharing its prefix, OR-matched alongside any plain tokens.
    fn search_fuzzy(
        &self,
        collection_id: CollectionId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(DocumentId, f32)>> {
        let (total_docs, total_tokens) = self.storage.fts_corpus_stats(collection_id)?;
        if total_docs == 0 {
            return Ok(Vec::new());
        }
        let avg_doc_len = total_tokens as f32 / total_docs as f32;

        let mut scores: HashMap<DocumentId, f32> = HashMap::new();
        let mut seen_terms = HashSet::new();

        for word in query.split_whitespace() {
            let is_prefix = word.ends_with('*') || word.ends_with('~');
            let stripped = word.trim_end_matches(['*', '~']);
            let Some(base) = tokenize(stripped).into_iter().next() else {
                continue;
            };

            if is_prefix {
                for (term, postings) in self.storage.get_postings_by_prefix(collection_id, &base)? {
                    if !seen_terms.insert(term) {
                        continue;
                    }
                    Self::accumulate_bm25(&postings, total_docs, avg_doc_len, self.storage, collection_id, &mut scores)?;
                }
            } else {
                if !seen_terms.insert(base.clone()) {
                    continue;
                }
                let postings = self.storage.get_postings(collection_id, &base)?;
                Self::accumulate_bm25(&postings, total_docs, avg_doc_len, self.storage, collection_id, &mut scores)?;
            }
        }

        Ok(Self::rank(scores, k))
    }

    /// Scores every document carrying any of `terms` with BM25, OR-matched.
    fn score_terms(&self, collection_id: CollectionId, terms: &[String]) -> Result<HashMap<DocumentId, f32>> {
        let (total_docs, total_tokens) = self.storage.fts_corpus_stats(collection_id)?;
        if total_docs == 0 {
            return Ok(HashMap::new());
        }
        let avg_doc_len = total_tokens as f32 / total_docs as f32;

        let mut seen_terms = HashSet::new();
        let mut scores: HashMap<DocumentId, f32> = HashMap::new();
        for term in terms {
            if !seen_terms.insert(term.clone()) {
                continue;
            }
            let postings = self.storage.get_postings(collection_id, term)?;
            Self::accumulate_bm25(&postings, total_docs, avg_doc_len, self.storage, collection_id, &mut scores)?;
        }
        Ok(scores)
    }

    /// Adds one term's BM25 contribution, for every document in `postings`,
    /// into `scores`.
    fn accumulate_bm25(
        postings: &PostingsList,
        total_docs: u64,
        avg_doc_len: f32,
        storage: &dyn StorageEngine,
        collection_id: CollectionId,
        scores: &mut HashMap<DocumentId, f32>,
    ) -> Result<()> {
        if postings.postings.is_empty() {
            return Ok(());
        }

        // IDF with the standard +1 smoothing so a term appearing in every
        // document still contributes a small positive weight.
        let n_t = postings.postings.len() as f32;
        let idf = ((total_docs as f32 - n_t + 0.5) / (n_t + 0.5) + 1.0).ln();

        for (doc_id_str, freq) in &postings.postings {
            let doc_id = DocumentId::new(doc_id_str.clone());
            let doc_len = storage
                .document_length(collection_id, &doc_id)?
                .map(|l| l as f32)
                .unwrap_or(avg_doc_len);

            let tf = *freq as f32;
            let denom = tf + K1 * (1.0 - B + B * (doc_len / avg_doc_len.max(1.0)));
            let score = idf * (tf * (K1 + 1.0)) / denom.max(f32::EPSILON);

            *scores.entry(doc_id).or_insert(0.0) += score;
        }
        Ok(())
    }

    fn doc_ids_for_term(&self, collection_id: CollectionId, term: &str) -> Result<HashSet<DocumentId>> {
        let postings = self.storage.get_postings(collection_id, term)?;
        Ok(postings.postings.iter().map(|(id, _)| DocumentId::new(id.clone())).collect())
    }

    fn rank(scores: HashMap<DocumentId, f32>, k: usize) -> Vec<(DocumentId, f32)> {
        let mut ranked: Vec<(DocumentId, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        ranked
    }
}
