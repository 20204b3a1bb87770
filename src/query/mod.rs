//! Query-embedding pipeline: fingerprinting, single-flight coalescing, and
//! the cache-aware embed path used before every similarity search.

mod fingerprint;
mod pipeline;
mod singleflight;

pub use fingerprint::fingerprint;
pub use pipeline::{EmbeddingMeta, QueryPipeline};
pub use singleflight::SingleFlight;
