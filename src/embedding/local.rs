//! Bundled deterministic embedding provider.
//!
//! No network access and no model download: text is hashed into a
//! fixed-dimension vector via signed random projections of its tokens, then
//! L2-normalized. Cosine similarity between two such vectors tracks lexical
//! overlap — not a substitute for a trained model, but enough to exercise
//! the full hybrid-search path without an external dependency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::config::ProviderConfig;
use crate::error::{LocalRetrieveError, ProviderErrorKind, Result};
use crate::fts::tokenize;
use crate::types::Embedding;

use super::EmbeddingProvider;

/// Number of hash "buckets" per token. Each token increments 4 dimensions
/// (with a sign derived from the hash), which keeps the resulting vector
/// dense enough for cosine similarity to be meaningful.
const PROJECTIONS_PER_TOKEN: u64 = 4;

pub struct LocalEmbeddingProvider {
    dimension: u16,
    max_batch_size: usize,
    max_text_length: usize,
    timeout: std::time::Duration,
    calls: AtomicU64,
}

impl LocalEmbeddingProvider {
    pub fn new(dimension: u16, config: &ProviderConfig) -> Self {
        Self {
            dimension,
            max_batch_size: config.max_batch_size,
            max_text_length: config.max_text_length,
            timeout: config.local_timeout,
            calls: AtomicU64::new(0),
        }
    }

    fn project(&self, text: &str) -> Embedding {
        let dim = self.dimension as usize;
        let mut vector = vec![0f32; dim];
        let tokens = tokenize(text);
        let terms: Vec<&str> = if tokens.is_empty() {
            vec![text]
        } else {
            tokens.iter().map(String::as_str).collect()
        };

        for term in &terms {
            for seed in 0..PROJECTIONS_PER_TOKEN {
                let hash = hash_term(term, seed);
                let idx = (hash as usize) % dim;
                let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
                vector[idx] += sign;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

fn hash_term(term: &str, seed: u64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    seed.hash(&mut hasher);
    term.hash(&mut hasher);
    hasher.finish()
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn tag(&self) -> &str {
        "local"
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(LocalRetrieveError::provider(
                ProviderErrorKind::Validation,
                "cannot embed empty text",
            ));
        }
        if text.len() > self.max_text_length {
            return Err(LocalRetrieveError::provider(
                ProviderErrorKind::Validation,
                format!(
                    "text length {} exceeds max_text_length {}",
                    text.len(),
                    self.max_text_length
                ),
            ));
        }

        let start = Instant::now();
        let vector = timeout(self.timeout, async { self.project(text) })
            .await
            .map_err(|_| {
                LocalRetrieveError::provider(ProviderErrorKind::Network, "local embedding timed out")
            })?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(elapsed_us = start.elapsed().as_micros() as u64, "local embed");
        Ok(vector)
    }

    fn dimension(&self) -> u16 {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_text_length(&self) -> usize {
        self.max_text_length
    }

    fn metrics(&self) -> super::ProviderMetrics {
        super::ProviderMetrics { requests: self.calls.load(Ordering::Relaxed), failures: 0 }
    }
}
