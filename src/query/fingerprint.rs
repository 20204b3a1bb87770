//! Deterministic cache keys for query embeddings.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::CollectionId;

/// Builds a stable cache key for one `(collection, provider, text)` triple.
///
/// Same inputs always produce the same fingerprint, which is what lets the
/// cache coordinator and the single-flight map agree on identity without
/// sharing any other state.
pub fn fingerprint(collection_id: CollectionId, provider_tag: &str, text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    provider_tag.hash(&mut hasher);
    text.hash(&mut hasher);
    let text_hash = hasher.finish();
    format!("qe:{collection_id}:{provider_tag}:{text_hash:016x}")
}
