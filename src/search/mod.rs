//! Hybrid search: query analysis, strategy selection, FTS/vector execution,
//! rank fusion, and result post-processing.

mod analyzer;
mod executor;
mod fusion;
mod processor;

pub use analyzer::{
    analyze, select_strategy, FusionConfig, FusionMethod, FusionWeights, ModePreference,
    Normalization, QueryAnalysis, QueryType, SearchMode, SearchPlan, Strategy, MAX_SEARCH_LIMIT,
};
pub use executor::{execute, DebugInfo, ExecutionOutcome, PhaseTimings};
pub use fusion::{fuse, FusedResult, LegResult, ResultSource};
pub use processor::{build_results, Reranker, SearchResult};
