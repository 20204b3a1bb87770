//! Embedding provider abstractions for LocalRetrieve.
//!
//! This module provides the trait and implementations for embedding
//! generation. Embeddings are dense vector representations of text used
//! for semantic (vector) search.
//!
//! # Providers
//!
//! - [`LocalEmbeddingProvider`] — bundled deterministic provider, no network
//! - [`OpenAiEmbeddingProvider`] — HTTPS provider, requires the `openai` feature
//! - [`ExternalEmbeddingProvider`] — validates caller-supplied vectors only

mod local;
#[cfg(feature = "openai")]
mod openai;
mod registry;

pub use local::LocalEmbeddingProvider;
#[cfg(feature = "openai")]
pub use openai::OpenAiEmbeddingProvider;
pub use registry::ProviderRegistry;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{LocalRetrieveError, Result};
use crate::types::Embedding;

/// Liveness snapshot returned by [`EmbeddingProvider::health_check`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Whether the provider can currently serve requests.
    pub ready: bool,
    /// Optional human-readable detail (e.g. the reason it isn't ready).
    pub message: Option<String>,
}

/// Cumulative usage counters for a provider instance, reset only by process
/// restart. Exposed for `getModelStatus`-style diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ProviderMetrics {
    /// Total successful `embed`/`embed_batch` calls (batches count once).
    pub requests: u64,
    /// Total calls that returned an error.
    pub failures: u64,
}

/// Embedding provider trait for generating vector representations of text.
///
/// Implementations must be `Send + Sync` so a single provider instance can
/// serve concurrent embedding requests from the query pipeline and the
/// embedding queue worker at once.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// A short, stable identifier used in cache-key fingerprints (e.g.
    /// `"local"`, `"openai:text-embedding-3-small"`). Must not change for a
    /// given provider configuration, or cached embeddings silently go stale
    /// without being invalidated.
    fn tag(&self) -> &str;

    /// Generates an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generates embeddings for multiple texts in one batched call.
    ///
    /// The default implementation calls [`Self::embed`] sequentially;
    /// providers with a native batch API (e.g. HTTPS providers) should
    /// override this for lower latency and fewer requests.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Returns the dimension of embeddings produced by this provider.
    fn dimension(&self) -> u16;

    /// Validates that an embedding has the correct dimension.
    fn validate_embedding(&self, embedding: &Embedding) -> Result<()> {
        let expected = self.dimension() as usize;
        let actual = embedding.len();
        if actual != expected {
            return Err(LocalRetrieveError::dimension_mismatch(expected, actual));
        }
        Ok(())
    }

    /// Prepares the provider for use (warms a connection pool, validates
    /// credentials). Called once by the registry before a provider is
    /// handed out. The default is a no-op for providers with nothing to
    /// set up ahead of time.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Releases resources acquired by [`Self::initialize`]. Called when the
    /// registry evicts an idle provider.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Reports whether the provider can currently serve requests. The
    /// default defers to [`Self::is_ready`] with no extra detail.
    async fn health_check(&self) -> Result<ProviderHealth> {
        Ok(ProviderHealth { ready: self.is_ready(), message: None })
    }

    /// Cumulative request/failure counters for this provider instance.
    fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics::default()
    }

    /// Maximum number of texts accepted by a single [`Self::embed_batch`] call.
    fn max_batch_size(&self) -> usize;

    /// Maximum input length, in characters, accepted by `embed`/`embed_batch`.
    fn max_text_length(&self) -> usize;

    /// Whether the provider is ready to serve requests right now. The
    /// default is always-ready, matching providers with no warm-up state.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Validates caller-supplied vectors; never generates embeddings itself.
///
/// Used for [`crate::collection::ProviderKind::External`] collections,
/// where every document's embedding must already be present.
#[derive(Clone, Debug)]
pub struct ExternalEmbeddingProvider {
    dimension: u16,
}

impl ExternalEmbeddingProvider {
    /// Creates a validator for the given dimension.
    pub fn new(dimension: u16) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for ExternalEmbeddingProvider {
    fn tag(&self) -> &str {
        "external"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Err(LocalRetrieveError::config(
            "external provider collections require a caller-supplied embedding",
        ))
    }

    async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Embedding>> {
        Err(LocalRetrieveError::config(
            "external provider collections require a caller-supplied embedding",
        ))
    }

    fn dimension(&self) -> u16 {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        usize::MAX
    }

    fn max_text_length(&self) -> usize {
        usize::MAX
    }
}
