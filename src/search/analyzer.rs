//! Query analysis and search-strategy selection.
//!
//! [`analyze`] extracts cheap lexical features from raw query text and
//! classifies it into a [`QueryType`] with a confidence score;
//! [`select_strategy`] turns that analysis (plus what the caller knows
//! about the collection and its own preference) into a concrete
//! [`SearchPlan`] the executor can run without any further decisions.
//!
//! Structural markers (quotes, `*`/`~` wildcards, `AND`/`OR`/`NOT`) are
//! detected here on the *raw* query string, before [`crate::fts::tokenize`]
//! would otherwise strip them — tokenizing first destroys exactly the
//! punctuation this module needs to see.

use serde::{Deserialize, Serialize};

use crate::fts::tokenize;

/// Upper bound on `limit` accepted anywhere in the search API. Keeps a
/// pathological request from forcing an unbounded BM25/HNSW scan.
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Common English stop words, used only to compute `stop_word_ratio` — a
/// weak signal that a query is natural-language prose rather than a
/// keyword list.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "of", "in", "on", "at", "to",
    "for", "with", "and", "or", "but", "it", "this", "that", "do", "does", "did",
];

const QUESTION_WORDS: &[&str] = &["what", "why", "how", "when", "where", "who", "which"];

/// Coarse classification of what a query looks like, driving which FTS
/// query form the executor translates it into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// A handful of bare terms — OR-matched keyword search.
    Keyword,
    /// Quoted text — treated as a conjunctive (all-terms-present) phrase.
    Phrase,
    /// Explicit `AND`/`OR`/`NOT` operators.
    Boolean,
    /// Trailing `*`/`~` wildcards — prefix expansion per term.
    Fuzzy,
    /// Long natural-language phrasing — favors vector search.
    Semantic,
    /// Empty or otherwise uninterpretable input.
    Unknown,
}

/// Which search legs to run and how hard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
    /// Full-text only.
    TextOnly,
    /// Vector only.
    SemanticOnly,
    /// Both, fused.
    Hybrid,
}

/// How the FTS leg should read the query string. Distinct from
/// [`SearchMode`] (which legs run) — this is about query *form* within the
/// FTS leg and is used by [`crate::search::executor::execute`] to translate
/// the raw query before handing it to the BM25 index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Keyword,
    Phrase,
    Boolean,
    Fuzzy,
    Semantic,
    /// Both legs run and meaningfully contribute; the FTS leg still uses
    /// plain keyword translation (passthrough).
    Hybrid,
}

/// Extracted features of one query string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub token_count: usize,
    pub char_count: usize,
    pub has_quotes: bool,
    pub has_boolean_operators: bool,
    pub has_wildcard: bool,
    pub has_question_word: bool,
    pub has_numbers: bool,
    pub has_special_chars: bool,
    pub avg_word_length: f32,
    pub stop_word_ratio: f32,
    pub query_type: QueryType,
    /// How confident the classification is, in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Returns `true` if `query` contains `AND`, `OR`, or `NOT` as a whole,
/// case-sensitive word — lowercase `and`/`or`/`not` are common English
/// words and not reliable operator signals.
fn has_boolean_operators(query: &str) -> bool {
    query
        .split_whitespace()
        .any(|w| matches!(w, "AND" | "OR" | "NOT"))
}

/// Returns `true` if `query` is wrapped in a matched pair of quotes, the
/// only quoting form [`crate::fts::bm25`] treats as a phrase.
fn has_wrapping_quotes(query: &str) -> bool {
    let trimmed = query.trim();
    trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"')
}

/// Analyzes `query` text into lexical features and a classification.
pub fn analyze(query: &str) -> QueryAnalysis {
    let tokens = tokenize(query);
    let token_count = tokens.len();
    let char_count = query.chars().count();
    let has_quotes = query.contains('"');
    let has_boolean = has_boolean_operators(query);
    let has_wildcard = query.contains('*') || query.contains('~');
    let has_question_word = tokens.first().map(|w| QUESTION_WORDS.contains(&w.as_str())).unwrap_or(false);
    let has_numbers = query.chars().any(|c| c.is_ascii_digit());
    let has_special_chars = query
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace() && c != '"');

    let avg_word_length = if token_count == 0 {
        0.0
    } else {
        tokens.iter().map(|t| t.len()).sum::<usize>() as f32 / token_count as f32
    };
    let stop_word_ratio = if token_count == 0 {
        0.0
    } else {
        tokens.iter().filter(|t| STOP_WORDS.contains(&t.as_str())).count() as f32 / token_count as f32
    };

    let (query_type, confidence) = if token_count == 0 {
        (QueryType::Unknown, 0.0)
    } else if has_wrapping_quotes(query) {
        (QueryType::Phrase, 0.95)
    } else if has_quotes {
        // Quoted but not a single wrapping pair around the whole query —
        // still phrase-flavored, just a weaker signal.
        (QueryType::Phrase, 0.6)
    } else if has_boolean {
        (QueryType::Boolean, 0.9)
    } else if has_wildcard {
        (QueryType::Fuzzy, 0.85)
    } else if token_count <= 2 {
        (QueryType::Keyword, 0.9)
    } else if token_count >= 6 || has_question_word {
        let length_confidence = (token_count as f32 / 12.0).min(1.0) * 0.3;
        (QueryType::Semantic, 0.6 + length_confidence)
    } else {
        (QueryType::Keyword, 0.55)
    };

    QueryAnalysis {
        token_count,
        char_count,
        has_quotes,
        has_boolean_operators: has_boolean,
        has_wildcard,
        has_question_word,
        has_numbers,
        has_special_chars,
        avg_word_length,
        stop_word_ratio,
        query_type,
        confidence,
    }
}

/// Fusion method for combining FTS and vector result lists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FusionMethod {
    /// Reciprocal rank fusion with constant `k`.
    Rrf { k: u32 },
    /// Weighted linear combination of normalized scores.
    WeightedLinear,
}

/// Per-leg weights, used only by [`FusionMethod::WeightedLinear`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FusionWeights {
    pub fts: f32,
    pub vector: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { fts: 0.5, vector: 0.5 }
    }
}

/// Score normalization applied before [`FusionMethod::WeightedLinear`]
/// combines scores from two differently-scaled sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    None,
    MinMax,
    ZScore,
    Sigmoid,
}

/// How two ranked result lists are combined into one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusionConfig {
    pub method: FusionMethod,
    pub weights: FusionWeights,
    pub normalization: Normalization,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            method: FusionMethod::Rrf { k: 60 },
            weights: FusionWeights::default(),
            normalization: Normalization::MinMax,
        }
    }
}

/// A fully-resolved plan for one search call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchPlan {
    pub mode: SearchMode,
    pub strategy: Strategy,
    pub limit: usize,
    pub fusion: FusionConfig,
}

/// The caller's explicit preference, if any — `None` defers entirely to the
/// analyzer's classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModePreference {
    #[default]
    Auto,
    TextOnly,
    SemanticOnly,
    Hybrid,
}

/// Selects a [`SearchPlan`] from query features, a caller preference, and
/// whether the collection even has a vector index to search (an
/// [`crate::collection::ProviderKind::External`] collection with no
/// documents yet has nothing to search semantically).
pub fn select_strategy(
    analysis: &QueryAnalysis,
    preference: ModePreference,
    vector_available: bool,
    requested_limit: usize,
) -> SearchPlan {
    let limit = requested_limit.clamp(1, MAX_SEARCH_LIMIT);

    let mode = match preference {
        ModePreference::TextOnly => SearchMode::TextOnly,
        ModePreference::SemanticOnly if vector_available => SearchMode::SemanticOnly,
        ModePreference::SemanticOnly => SearchMode::TextOnly,
        ModePreference::Hybrid if vector_available => SearchMode::Hybrid,
        ModePreference::Hybrid => SearchMode::TextOnly,
        ModePreference::Auto => {
            if !vector_available {
                SearchMode::TextOnly
            } else {
                match analysis.query_type {
                    QueryType::Phrase | QueryType::Boolean | QueryType::Fuzzy | QueryType::Unknown => {
                        SearchMode::TextOnly
                    }
                    QueryType::Keyword if analysis.token_count <= 2 => SearchMode::TextOnly,
                    QueryType::Keyword | QueryType::Semantic => SearchMode::Hybrid,
                }
            }
        }
    };

    // FTS-leg translation strategy is driven purely by query content, not
    // by the caller's mode preference: a `searchSemantic` call still tags
    // a boolean-looking query as `Strategy::Boolean` even though the FTS
    // leg never runs, since it's informative in `DebugInfo`.
    let mut strategy = match analysis.query_type {
        QueryType::Phrase => Strategy::Phrase,
        QueryType::Boolean => Strategy::Boolean,
        QueryType::Fuzzy => Strategy::Fuzzy,
        QueryType::Semantic => Strategy::Semantic,
        QueryType::Keyword | QueryType::Unknown => Strategy::Keyword,
    };

    if strategy == Strategy::Semantic && !vector_available {
        strategy = Strategy::Keyword;
    }
    if mode == SearchMode::Hybrid && strategy == Strategy::Keyword {
        strategy = Strategy::Hybrid;
    }

    let mut fusion = FusionConfig::default();
    if mode == SearchMode::Hybrid && analysis.query_type == QueryType::Semantic && analysis.token_count < 8 {
        // A short-ish natural-language query still benefits from FTS's
        // exact-term precision; lean the fused score toward it rather
        // than trusting the vector leg's recall as much as a longer,
        // more clearly semantic query would warrant.
        fusion.weights = FusionWeights { fts: 0.6, vector: 0.4 };
    }

    SearchPlan { mode, strategy, limit, fusion }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_query_classified_as_keyword() {
        let analysis = analyze("rust");
        assert_eq!(analysis.query_type, QueryType::Keyword);
        assert!(analysis.confidence > 0.5);
    }

    #[test]
    fn test_long_query_classified_as_semantic() {
        let analysis = analyze("what is the best way to implement a hybrid search engine");
        assert_eq!(analysis.query_type, QueryType::Semantic);
    }

    #[test]
    fn test_quoted_whole_query_is_phrase_with_high_confidence() {
        let analysis = analyze("\"exact phrase match here please\"");
        assert_eq!(analysis.query_type, QueryType::Phrase);
        assert!(analysis.confidence >= 0.9);
    }

    #[test]
    fn test_boolean_operators_detected() {
        let analysis = analyze("rust AND async NOT tokio");
        assert_eq!(analysis.query_type, QueryType::Boolean);
        assert!(analysis.has_boolean_operators);
    }

    #[test]
    fn test_lowercase_and_is_not_mistaken_for_an_operator() {
        let analysis = analyze("rust and tokio and async runtimes");
        assert_ne!(analysis.query_type, QueryType::Boolean);
    }

    #[test]
    fn test_wildcard_detected_as_fuzzy() {
        let analysis = analyze("tok* runt*");
        assert_eq!(analysis.query_type, QueryType::Fuzzy);
        assert!(analysis.has_wildcard);
    }

    #[test]
    fn test_empty_query_is_unknown() {
        let analysis = analyze("   ");
        assert_eq!(analysis.query_type, QueryType::Unknown);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[test]
    fn test_select_strategy_without_vector_index_forces_text_only() {
        let analysis = analyze("a long natural language question about rust");
        let plan = select_strategy(&analysis, ModePreference::Auto, false, 10);
        assert_eq!(plan.mode, SearchMode::TextOnly);
        assert_eq!(plan.strategy, Strategy::Keyword);
    }

    #[test]
    fn test_select_strategy_respects_explicit_preference() {
        let analysis = analyze("anything");
        let plan = select_strategy(&analysis, ModePreference::TextOnly, true, 10);
        assert_eq!(plan.mode, SearchMode::TextOnly);
    }

    #[test]
    fn test_select_strategy_clamps_limit() {
        let analysis = analyze("query");
        let plan = select_strategy(&analysis, ModePreference::Auto, true, 10_000);
        assert_eq!(plan.limit, MAX_SEARCH_LIMIT);
        let plan_zero = select_strategy(&analysis, ModePreference::Auto, true, 0);
        assert_eq!(plan_zero.limit, 1);
    }

    #[test]
    fn test_short_keyword_query_prefers_text_only_when_vector_available() {
        let analysis = analyze("id");
        let plan = select_strategy(&analysis, ModePreference::Auto, true, 10);
        assert_eq!(plan.mode, SearchMode::TextOnly);
    }

    #[test]
    fn test_phrase_query_picks_phrase_strategy_and_text_only_mode() {
        let analysis = analyze("\"hybrid search engine\"");
        let plan = select_strategy(&analysis, ModePreference::Auto, true, 10);
        assert_eq!(plan.strategy, Strategy::Phrase);
        assert_eq!(plan.mode, SearchMode::TextOnly);
    }

    #[test]
    fn test_boolean_query_picks_boolean_strategy() {
        let analysis = analyze("rust AND async");
        let plan = select_strategy(&analysis, ModePreference::Auto, true, 10);
        assert_eq!(plan.strategy, Strategy::Boolean);
    }

    #[test]
    fn test_semantic_strategy_demoted_without_vector_index() {
        let analysis = analyze("what is the best way to implement a hybrid search engine");
        let plan = select_strategy(&analysis, ModePreference::Auto, false, 10);
        assert_eq!(plan.strategy, Strategy::Keyword);
    }

    #[test]
    fn test_mid_length_keyword_query_with_vector_picks_hybrid_strategy() {
        let analysis = analyze("rust async runtime benchmarks");
        let plan = select_strategy(&analysis, ModePreference::Auto, true, 10);
        assert_eq!(plan.mode, SearchMode::Hybrid);
        assert_eq!(plan.strategy, Strategy::Hybrid);
    }

    #[test]
    fn test_short_semantic_query_reduces_vector_weight() {
        let analysis = analyze("why does tokio spawn block");
        assert_eq!(analysis.query_type, QueryType::Semantic);
        let plan = select_strategy(&analysis, ModePreference::Auto, true, 10);
        assert!(plan.fusion.weights.fts > plan.fusion.weights.vector);
    }
}
