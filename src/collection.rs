//! Collection types.
//!
//! A **collection** is an isolated namespace of documents with one fixed
//! embedding configuration: its own FTS index, HNSW vector index, and row in
//! the collections registry table.

use serde::{Deserialize, Serialize};

use crate::config::EmbeddingDimension;
use crate::error::{LocalRetrieveError, ValidationError};
use crate::types::{CollectionId, Timestamp};

/// Maximum length of a collection name, in characters.
const MAX_NAME_LEN: usize = 255;

/// Validates a collection name: non-empty, not whitespace-only, at most
/// [`MAX_NAME_LEN`] characters.
pub(crate) fn validate_collection_name(name: &str) -> Result<(), LocalRetrieveError> {
    if name.trim().is_empty() {
        return Err(ValidationError::required_field("name").into());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::invalid_field(
            "name",
            format!("exceeds max length of {MAX_NAME_LEN} characters"),
        )
        .into());
    }
    Ok(())
}

/// Which kind of embedding provider a collection was created with.
///
/// Stored alongside the collection so the engine can re-resolve the right
/// provider without the caller repeating the choice on every call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// The bundled deterministic local provider.
    Local,
    /// An OpenAI-compatible HTTPS provider.
    OpenAi,
    /// Caller supplies pre-computed vectors for every document.
    External,
}

/// A named, isolated namespace of documents.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Collection {
    /// Unique identifier (UUID v7, time-ordered).
    pub id: CollectionId,

    /// Human-readable name, unique across the database.
    pub name: String,

    /// Embedding vector dimension fixed at creation time.
    pub dimension: u16,

    /// Which provider generates embeddings for this collection.
    pub provider: ProviderKind,

    /// When this collection was created.
    pub created_at: Timestamp,
}

impl Collection {
    /// Creates a new collection with a fresh id and the current timestamp.
    pub fn new(name: impl Into<String>, dimension: EmbeddingDimension, provider: ProviderKind) -> Self {
        Self {
            id: CollectionId::new(),
            name: name.into(),
            dimension: dimension.size() as u16,
            provider,
            created_at: Timestamp::now(),
        }
    }
}

/// Aggregate statistics for a collection, computed on demand.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Number of documents currently stored (excluding tombstones).
    pub document_count: u64,
    /// Number of vectors currently active in the HNSW index.
    pub active_vector_count: u64,
    /// Number of distinct terms in the FTS inverted index.
    pub distinct_term_count: u64,
    /// Number of pending/processing rows in the embedding queue.
    pub queued_embeddings: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_new() {
        let c = Collection::new("docs", EmbeddingDimension::D384, ProviderKind::Local);
        assert_eq!(c.name, "docs");
        assert_eq!(c.dimension, 384);
        assert_eq!(c.provider, ProviderKind::Local);
    }

    #[test]
    fn test_collection_bincode_roundtrip() {
        let c = Collection::new("docs", EmbeddingDimension::D768, ProviderKind::OpenAi);
        let bytes = bincode::serialize(&c).unwrap();
        let restored: Collection = bincode::deserialize(&bytes).unwrap();
        assert_eq!(c.id, restored.id);
        assert_eq!(c.name, restored.name);
        assert_eq!(c.dimension, restored.dimension);
    }

    #[test]
    fn test_collection_stats_default() {
        let stats = CollectionStats::default();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.queued_embeddings, 0);
    }

    #[test]
    fn test_validate_collection_name_rejects_empty_and_whitespace() {
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("   ").is_err());
    }

    #[test]
    fn test_validate_collection_name_rejects_too_long() {
        let name = "a".repeat(MAX_NAME_LEN + 1);
        assert!(validate_collection_name(&name).is_err());
    }

    #[test]
    fn test_validate_collection_name_accepts_normal_name() {
        assert!(validate_collection_name("my-collection").is_ok());
    }
}
