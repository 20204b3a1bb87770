//! Query-embedding pipeline: text in, cached vector out.
//!
//! Wires together the three pieces the rest of this module provides —
//! [`fingerprint`], [`SingleFlight`], and [`CacheCoordinator`] — with an
//! [`EmbeddingProvider`] to answer "what's the embedding for this query
//! text" without ever issuing two identical provider calls concurrently or
//! hitting the provider at all on a cache hit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::CacheCoordinator;
use crate::embedding::EmbeddingProvider;
use crate::error::{LocalRetrieveError, ProviderErrorKind, Result, StorageError, ValidationError};
use crate::storage::StorageEngine;
use crate::types::{CollectionId, Embedding};

use super::fingerprint::fingerprint;
use super::singleflight::SingleFlight;

/// Metadata returned alongside a generated query embedding.
#[derive(Clone, Debug)]
pub struct EmbeddingMeta {
    /// Tag of the provider that produced (or would produce) this embedding.
    pub provider_tag: String,
    /// Dimension of the returned vector.
    pub dimension: u16,
    /// Whether this embedding was served from a cache tier.
    pub from_cache: bool,
    /// Wall-clock time spent generating the embedding, in milliseconds (0 on
    /// a cache hit).
    pub latency_ms: u64,
}

/// The cache key under which a generated query embedding is tagged, so a
/// whole provider's worth of cached query embeddings can be invalidated at
/// once (e.g. `clearEmbeddingCache`) via `CacheCoordinator::invalidate`.
const QUERY_EMBEDDING_TAG: &str = "query-embedding";

/// Single-flight result type. The error is `Arc`-wrapped because
/// [`SingleFlight`] requires a `Clone` value and [`LocalRetrieveError`]
/// itself isn't `Clone`; losing the `Arc` wrapper (when more than one
/// waiter shares the same failed call) falls back to a generic provider
/// error carrying the original message.
type FlightResult = std::result::Result<(Embedding, EmbeddingMeta), Arc<LocalRetrieveError>>;

fn unwrap_flight_error(err: Arc<LocalRetrieveError>) -> LocalRetrieveError {
    Arc::try_unwrap(err)
        .unwrap_or_else(|shared| LocalRetrieveError::provider(ProviderErrorKind::Network, shared.to_string()))
}

/// Resolves query text to embedding vectors through the cache cascade,
/// coalescing concurrent identical requests, and falling back to the
/// configured embedding provider on a miss.
pub struct QueryPipeline {
    cache: Arc<CacheCoordinator>,
    flight: SingleFlight<String, FlightResult>,
    deadline: Duration,
}

impl QueryPipeline {
    /// `deadline` bounds a single provider call (covers both the local and
    /// HTTPS providers; the HTTPS provider's own `http_timeout` is shorter
    /// and will usually fire first).
    pub fn new(cache: Arc<CacheCoordinator>, deadline: Duration) -> Self {
        Self {
            cache,
            flight: SingleFlight::new(),
            deadline,
        }
    }

    /// Resolves the embedding for `query` in `collection_id` via `provider`.
    pub async fn generate_query_embedding(
        &self,
        storage: Arc<dyn StorageEngine>,
        collection_id: CollectionId,
        provider: Arc<dyn EmbeddingProvider>,
        query: &str,
    ) -> Result<(Embedding, EmbeddingMeta)> {
        let normalized = query.trim();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }

        let key = fingerprint(collection_id, provider.tag(), normalized);

        if let Some(bytes) = self.cache.get(storage.as_ref(), collection_id, &key)? {
            let embedding: Embedding = bincode::deserialize(&bytes)
                .map_err(|e| StorageError::corrupted(format!("cached query embedding corrupt: {e}")))?;
            debug!(%collection_id, provider = provider.tag(), "query embedding cache hit");
            return Ok((
                embedding,
                EmbeddingMeta {
                    provider_tag: provider.tag().to_string(),
                    dimension: provider.dimension(),
                    from_cache: true,
                    latency_ms: 0,
                },
            ));
        }

        let deadline = self.deadline;
        let cache = self.cache.clone();
        let text = normalized.to_string();
        let key_for_flight = key.clone();

        self.flight
            .run(key, async move {
                let start = Instant::now();
                let embed_result = timeout(deadline, provider.embed(&text)).await;
                let embedding = match embed_result {
                    Ok(Ok(embedding)) => embedding,
                    Ok(Err(e)) => return Err(Arc::new(e)),
                    Err(_) => {
                        return Err(Arc::new(LocalRetrieveError::provider(
                            ProviderErrorKind::Network,
                            "query embedding generation timed out",
                        )))
                    }
                };

                if let Err(e) = provider.validate_embedding(&embedding) {
                    return Err(Arc::new(e));
                }
                if let Some(index) = embedding.iter().position(|v| !v.is_finite()) {
                    return Err(Arc::new(ValidationError::NonFiniteComponent { index }.into()));
                }

                let bytes = match bincode::serialize(&embedding) {
                    Ok(b) => b,
                    Err(e) => return Err(Arc::new(StorageError::serialization(e.to_string()).into())),
                };
                if let Err(e) = cache
                    .set_with_tags(
                        storage.as_ref(),
                        collection_id,
                        &key_for_flight,
                        bytes,
                        vec![QUERY_EMBEDDING_TAG.to_string()],
                    )
                    .await
                {
                    return Err(Arc::new(e));
                }

                Ok((
                    embedding,
                    EmbeddingMeta {
                        provider_tag: provider.tag().to_string(),
                        dimension: provider.dimension(),
                        from_cache: false,
                        latency_ms: start.elapsed().as_millis() as u64,
                    },
                ))
            })
            .await
            .map_err(unwrap_flight_error)
    }

    /// Resolves embeddings for many queries at once, deduplicating
    /// identical query texts (the single-flight map already coalesces these)
    /// and bounding concurrency to `max_concurrent`.
    ///
    /// Calls `on_progress(completed, total)` after each query resolves,
    /// successful or not.
    pub async fn batch_generate_query_embeddings(
        &self,
        storage: Arc<dyn StorageEngine>,
        collection_id: CollectionId,
        provider: Arc<dyn EmbeddingProvider>,
        queries: &[String],
        max_concurrent: usize,
        mut on_progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Vec<Result<(Embedding, EmbeddingMeta)>> {
        let total = queries.len();
        let futures_iter = queries.iter().map(|query| {
            let storage = storage.clone();
            let provider = provider.clone();
            async move {
                self.generate_query_embedding(storage, collection_id, provider, query)
                    .await
            }
        });

        let mut results = Vec::with_capacity(total);
        let mut completed = 0usize;
        let mut buffered = stream::iter(futures_iter).buffer_unordered(max_concurrent.max(1));
        while let Some(result) = buffered.next().await {
            completed += 1;
            if let Some(cb) = on_progress.as_deref_mut() {
                cb(completed, total);
            }
            if let Err(ref e) = result {
                warn!(error = %e, "query embedding generation failed during batch");
            }
            results.push(result);
        }
        results
    }

    /// Pre-populates the cache for `queries` without returning their
    /// vectors. Failures are logged and skipped; one bad query shouldn't
    /// abort warming the rest.
    pub async fn warm_embedding_cache(
        &self,
        storage: Arc<dyn StorageEngine>,
        collection_id: CollectionId,
        provider: Arc<dyn EmbeddingProvider>,
        queries: &[String],
    ) -> usize {
        let results = self
            .batch_generate_query_embeddings(storage, collection_id, provider, queries, 8, None)
            .await;
        results.iter().filter(|r| r.is_ok()).count()
    }
}
