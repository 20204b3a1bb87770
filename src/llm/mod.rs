//! Optional LLM façade: query enhancement and result summarization, kept
//! behind the `llm` feature and entirely orthogonal to the core search
//! path. A failure anywhere in this module is caught and logged; it never
//! prevents [`crate::Engine::search`] from returning its own results.

mod client;

pub use client::{LlmClient, LlmConfig};

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::engine::Engine;
use crate::error::{LocalRetrieveError, Result, RpcError};
use crate::rpc::{handler, MethodRegistry};
use crate::search::{ModePreference, SearchResult};
use crate::types::CollectionId;

/// Result of [`search_with_llm`]: the engine's own search results plus an
/// optional LLM-generated summary.
#[derive(Debug, Clone)]
pub struct SearchWithLlmResult {
    /// The underlying hybrid search results, unaffected by LLM failures.
    pub results: Vec<SearchResult>,
    /// A natural-language summary of `results`, or `None` if summarization
    /// was unavailable or failed.
    pub summary: Option<String>,
}

/// Runs a normal hybrid search, then asks the LLM to summarize the results.
///
/// If summarization fails, the search results are still returned with
/// `summary: None` and a warning is logged — this function never fails
/// because of the LLM leg.
pub async fn search_with_llm(
    engine: &Engine,
    llm: &LlmClient,
    collection_id: CollectionId,
    query: &str,
    limit: usize,
    preference: ModePreference,
) -> Result<SearchWithLlmResult> {
    let results = engine.search(collection_id, query, limit, preference).await?;

    let summary = match llm.summarize_results(query, &results).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(error = %e, "llm summarization failed, returning search results without a summary");
            None
        }
    };

    Ok(SearchWithLlmResult { results, summary })
}

#[derive(Deserialize)]
struct SearchWithLlmParams {
    collection_id: CollectionId,
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    10
}

fn invalid_params(e: serde_json::Error) -> RpcError {
    RpcError::Handler { code: "VALIDATION_ERROR".to_string(), message: format!("invalid params: {e}") }
}
fn handler_error(e: LocalRetrieveError) -> RpcError {
    RpcError::Handler { code: e.code().to_string(), message: e.to_string() }
}
fn serialize_error(e: serde_json::Error) -> RpcError {
    RpcError::Handler { code: "SERIALIZATION_ERROR".to_string(), message: e.to_string() }
}

/// Registers the façade's methods (`enhanceQuery`, `summarizeResults`,
/// `callLLM`, `searchWithLLM`) onto `registry`. Kept as a standalone
/// function rather than folded into [`Engine::method_registry`] since it
/// needs an [`LlmClient`] the core engine has no reason to know about.
pub fn register_methods(registry: &mut MethodRegistry, engine: Arc<Engine>, llm: Arc<LlmClient>) {
    {
        let llm = llm.clone();
        registry.register(
            "enhanceQuery",
            handler(move |params: Value| {
                let llm = llm.clone();
                async move {
                    let query: String = serde_json::from_value(params).map_err(invalid_params)?;
                    let enhanced = llm.enhance_query(&query).await.map_err(handler_error)?;
                    serde_json::to_value(enhanced).map_err(serialize_error)
                }
            }),
        );
    }
    {
        let engine = engine.clone();
        let llm = llm.clone();
        registry.register(
            "summarizeResults",
            handler(move |params: Value| {
                let engine = engine.clone();
                let llm = llm.clone();
                async move {
                    let req: SearchWithLlmParams = serde_json::from_value(params).map_err(invalid_params)?;
                    let results = engine
                        .search(req.collection_id, &req.query, req.limit, ModePreference::Auto)
                        .await
                        .map_err(handler_error)?;
                    let summary = llm.summarize_results(&req.query, &results).await.map_err(handler_error)?;
                    serde_json::to_value(summary).map_err(serialize_error)
                }
            }),
        );
    }
    {
        let llm = llm.clone();
        registry.register(
            "callLLM",
            handler(move |params: Value| {
                let llm = llm.clone();
                async move {
                    let prompt: String = serde_json::from_value(params).map_err(invalid_params)?;
                    let response = llm.call_llm(&prompt).await.map_err(handler_error)?;
                    serde_json::to_value(response).map_err(serialize_error)
                }
            }),
        );
    }
    {
        registry.register(
            "searchWithLLM",
            handler(move |params: Value| {
                let engine = engine.clone();
                let llm = llm.clone();
                async move {
                    let req: SearchWithLlmParams = serde_json::from_value(params).map_err(invalid_params)?;
                    let outcome = search_with_llm(
                        &engine,
                        &llm,
                        req.collection_id,
                        &req.query,
                        req.limit,
                        ModePreference::Auto,
                    )
                    .await
                    .map_err(handler_error)?;
                    serde_json::to_value((outcome.results, outcome.summary)).map_err(serialize_error)
                }
            }),
        );
    }
}
