//! Document types and validation.
//!
//! A **document** is the core unit of indexed content: caller-supplied text
//! plus metadata, indexed into both the full-text and vector indices on
//! insert.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LocalRetrieveError, ValidationError};
use crate::storage::schema::{MAX_CONTENT_SIZE, MAX_METADATA_ENTRIES, MAX_METADATA_VALUE_LENGTH};
use crate::types::{CollectionId, DocumentId, Timestamp};

/// A stored document.
///
/// # Serialization Note
///
/// The `embedding` field is marked `#[serde(skip)]` because embeddings are
/// stored in a separate `EMBEDDINGS_TABLE` for performance. The storage
/// layer reconstitutes the full struct by joining both tables on read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied identifier, unique within the collection.
    pub id: DocumentId,

    /// The collection this document belongs to.
    pub collection_id: CollectionId,

    /// Optional display title, included in FTS indexing and snippet generation.
    pub title: Option<String>,

    /// The document content (text). Immutable after creation; replace the
    /// document to change it.
    pub content: String,

    /// Semantic embedding vector. Immutable after creation.
    ///
    /// Stored separately in `EMBEDDINGS_TABLE`; skipped during bincode
    /// serialization of the main document record.
    #[serde(skip)]
    pub embedding: Vec<f32>,

    /// Free-form metadata, stored alongside the document and returned with
    /// search results.
    pub metadata: Map<String, Value>,

    /// When this document was recorded.
    pub timestamp: Timestamp,
}

/// Input for creating or replacing a document via `Engine::upsert_document`.
///
/// # Embedding
///
/// - **Local/OpenAI provider**: `embedding` is optional; if `None`, the
///   engine generates it (inline or via the embedding queue).
/// - **External provider**: `embedding` is required (must be `Some`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewDocument {
    /// Caller-supplied identifier, unique within the collection.
    pub id: DocumentId,

    /// The collection to store this document in.
    pub collection_id: CollectionId,

    /// Optional display title.
    pub title: Option<String>,

    /// The document content (text).
    pub content: String,

    /// Pre-computed embedding vector. Required for the External provider.
    pub embedding: Option<Vec<f32>>,

    /// Free-form metadata.
    pub metadata: Map<String, Value>,
}

/// Partial update for a document's mutable fields.
///
/// Content and embedding are immutable — call `upsert_document` again to
/// replace them (which re-indexes FTS postings and the vector entry).
#[derive(Clone, Debug, Default)]
pub struct DocumentUpdate {
    /// Replace the title.
    pub title: Option<Option<String>>,
    /// Merge (not replace) these keys into the existing metadata map.
    pub metadata: Option<Map<String, Value>>,
}

/// Validates a [`NewDocument`] before storage.
///
/// | Field | Constraint |
/// |-------|------------|
/// | `id` | Non-empty |
/// | `content` | Non-empty, max 1 MB |
/// | `metadata` | Max 64 entries, each value serialized max 4 KB |
/// | `embedding` | Required if `is_external_provider`; dimension must match collection; every component finite |
pub(crate) fn validate_new_document(
    doc: &NewDocument,
    collection_dimension: u16,
    is_external_provider: bool,
) -> Result<(), LocalRetrieveError> {
    if doc.id.as_str().is_empty() {
        return Err(ValidationError::required_field("id").into());
    }

    if doc.content.is_empty() {
        return Err(ValidationError::required_field("content").into());
    }

    if doc.content.len() > MAX_CONTENT_SIZE {
        return Err(ValidationError::content_too_large(doc.content.len(), MAX_CONTENT_SIZE).into());
    }

    if doc.metadata.len() > MAX_METADATA_ENTRIES {
        return Err(ValidationError::too_many_items(
            "metadata",
            doc.metadata.len(),
            MAX_METADATA_ENTRIES,
        )
        .into());
    }

    for (key, value) in &doc.metadata {
        let size = serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0);
        if size > MAX_METADATA_VALUE_LENGTH {
            return Err(ValidationError::invalid_field(
                format!("metadata.{key}"),
                format!(
                    "value exceeds max serialized size of {MAX_METADATA_VALUE_LENGTH} bytes (got {size})"
                ),
            )
            .into());
        }
    }

    if is_external_provider && doc.embedding.is_none() {
        return Err(ValidationError::required_field(
            "embedding (required when using the External embedding provider)",
        )
        .into());
    }

    if let Some(ref emb) = doc.embedding {
        if emb.len() != collection_dimension as usize {
            return Err(
                ValidationError::dimension_mismatch(collection_dimension as usize, emb.len()).into(),
            );
        }
        if let Some(index) = emb.iter().position(|v| !v.is_finite()) {
            return Err(ValidationError::NonFiniteComponent { index }.into());
        }
    }

    Ok(())
}

/// Validates a [`DocumentUpdate`] before applying.
pub(crate) fn validate_document_update(update: &DocumentUpdate) -> Result<(), LocalRetrieveError> {
    if let Some(ref metadata) = update.metadata {
        if metadata.len() > MAX_METADATA_ENTRIES {
            return Err(ValidationError::too_many_items(
                "metadata",
                metadata.len(),
                MAX_METADATA_ENTRIES,
            )
            .into());
        }
    }
    Ok(())
}
