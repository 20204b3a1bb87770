//! Provider registry: resolves collections to embedding provider instances.
//!
//! Each collection has one fixed [`crate::collection::ProviderKind`]; this
//! registry lazily constructs the matching [`EmbeddingProvider`] on first
//! use and caches it, so repeated queries against the same collection don't
//! pay initialization cost again. Entries idle past a configured timeout are
//! evicted by a periodic sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::collection::ProviderKind;
use crate::config::{EmbeddingProvider as EmbeddingProviderConfig, ProviderConfig};
use crate::error::{LocalRetrieveError, Result};
use crate::types::CollectionId;

use super::local::LocalEmbeddingProvider;
use super::{EmbeddingProvider, ExternalEmbeddingProvider};

struct Entry {
    provider: Arc<dyn EmbeddingProvider>,
    last_used: Instant,
}

/// Owns every embedding provider instance the engine has created, keyed by
/// collection id.
pub struct ProviderRegistry {
    entries: Mutex<HashMap<CollectionId, Entry>>,
    embedding_provider: EmbeddingProviderConfig,
    provider_config: ProviderConfig,
    idle_timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(embedding_provider: EmbeddingProviderConfig, provider_config: ProviderConfig) -> Self {
        let idle_timeout = provider_config.idle_eviction;
        Self {
            entries: Mutex::new(HashMap::new()),
            embedding_provider,
            provider_config,
            idle_timeout,
        }
    }

    /// Returns the provider for `collection_id`, constructing it on first
    /// use. `kind` and `dimension` come from the collection's stored record.
    pub async fn get_provider(
        &self,
        collection_id: CollectionId,
        kind: &ProviderKind,
        dimension: u16,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&collection_id) {
            entry.last_used = Instant::now();
            return Ok(entry.provider.clone());
        }

        let provider = self.build_provider(kind, dimension)?;
        provider.initialize().await?;
        info!(collection = %collection_id, provider = provider.tag(), "embedding provider initialized");
        entries.insert(
            collection_id,
            Entry { provider: provider.clone(), last_used: Instant::now() },
        );
        Ok(provider)
    }

    fn build_provider(&self, kind: &ProviderKind, dimension: u16) -> Result<Arc<dyn EmbeddingProvider>> {
        match kind {
            ProviderKind::Local => {
                Ok(Arc::new(LocalEmbeddingProvider::new(dimension, &self.provider_config)))
            }
            ProviderKind::External => Ok(Arc::new(ExternalEmbeddingProvider::new(dimension))),
            ProviderKind::OpenAi => self.build_openai(dimension),
        }
    }

    #[cfg(feature = "openai")]
    fn build_openai(&self, dimension: u16) -> Result<Arc<dyn EmbeddingProvider>> {
        use super::openai::OpenAiEmbeddingProvider;
        Ok(Arc::new(OpenAiEmbeddingProvider::new(
            dimension,
            &self.embedding_provider,
            &self.provider_config,
        )?))
    }

    #[cfg(not(feature = "openai"))]
    fn build_openai(&self, _dimension: u16) -> Result<Arc<dyn EmbeddingProvider>> {
        Err(LocalRetrieveError::config(
            "collection uses the OpenAI provider but this build was compiled without the `openai` feature",
        ))
    }

    /// Removes a provider's cache entry, e.g. when its collection is
    /// dropped, releasing its resources via [`EmbeddingProvider::cleanup`].
    pub async fn remove_provider(&self, collection_id: CollectionId) {
        if let Some(entry) = self.entries.lock().await.remove(&collection_id) {
            if let Err(e) = entry.provider.cleanup().await {
                debug!(error = %e, "provider cleanup failed during removal");
            }
        }
    }

    /// Evicts providers idle past the configured timeout, releasing each
    /// one's resources via [`EmbeddingProvider::cleanup`]. Intended to be
    /// called periodically from a background sweep task.
    pub async fn evict_idle(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let idle_timeout = self.idle_timeout;
        let stale: Vec<CollectionId> = entries
            .iter()
            .filter(|(_, entry)| entry.last_used.elapsed() >= idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        let evicted = stale.len();
        for id in stale {
            if let Some(entry) = entries.remove(&id) {
                if let Err(e) = entry.provider.cleanup().await {
                    debug!(error = %e, "provider cleanup failed during idle eviction");
                }
            }
        }
        if evicted > 0 {
            debug!(evicted, "evicted idle embedding providers");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
