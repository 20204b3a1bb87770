//! # LocalRetrieve
//!
//! Embedded hybrid search engine: full-text (BM25) plus vector (HNSW/cosine)
//! search over a single redb-backed database, with a durable embedding
//! queue and a three-tier query-embedding cache.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use localretrieve::{Config, Engine, ModePreference, NewDocument, ProviderKind};
//!
//! let engine = Engine::open("./search.db", Config::default())?;
//! let collection_id = engine.create_collection("docs", ProviderKind::External)?;
//!
//! engine.upsert_document(NewDocument {
//!     id: "doc-1".into(),
//!     collection_id,
//!     title: None,
//!     content: "Always validate user input before processing".to_string(),
//!     embedding: Some(query_embedding),
//!     metadata: Default::default(),
//! }).await?;
//!
//! let results = engine.search(collection_id, "validate input", 10, ModePreference::Auto).await?;
//! engine.close()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### Collection
//!
//! A **collection** is an isolated namespace of documents: its own FTS
//! index, HNSW vector index, and embedding dimension, fixed at creation.
//!
//! ### Document
//!
//! A **document** is the unit of indexed content: text plus metadata,
//! indexed into both the full-text and vector indices on insert.
//!
//! ### Embedding Providers
//!
//! - **Local** — bundled deterministic provider, no network calls.
//! - **OpenAI** — HTTPS provider (requires the `openai` feature).
//! - **External** — caller supplies every document's embedding; the engine
//!   never generates one itself.
//!
//! ## Features
//!
//! - `openai` — enables the HTTPS OpenAI-compatible embedding provider.
//! - `llm` — enables the optional LLM façade for query enhancement and
//!   result summarization, isolated from the core search path.
//!
//! ## Thread Safety
//!
//! [`Engine`] is `Send + Sync` and can be shared across tasks via `Arc`.
//! Storage uses MVCC for concurrent reads with single-writer transactions.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod collection;
mod config;
mod document;
mod engine;
mod error;
mod types;

pub mod cache;
pub mod embedding;
pub mod fts;
pub mod query;
pub mod queue;
pub mod rpc;
pub mod search;
pub mod storage;
pub mod vector;

#[cfg(feature = "llm")]
pub mod llm;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main engine interface
pub use engine::Engine;

// Configuration
pub use config::{
    CacheConfig, Config, EmbeddingDimension, EmbeddingProvider, EvictionStrategy, ProviderConfig,
    RpcConfig, StoragePragmas, SyncMode, VectorIndexConfig,
};

// Error handling
pub use error::{
    CacheError, LocalRetrieveError, NotFoundError, ProviderErrorKind, Result, RpcError,
    StorageError, ValidationError,
};

// Core types
pub use types::{CollectionId, DocumentId, Embedding, Timestamp};

// Domain types
pub use collection::{Collection, CollectionStats, ProviderKind};
pub use document::{Document, DocumentUpdate, NewDocument};

// Search
pub use search::{ModePreference, QueryType, SearchMode, SearchResult};

// RPC transport (for embedding LocalRetrieve behind a worker boundary)
pub use rpc::{HandlerFn, MethodRegistry, RpcClient, RpcTransport};

// Storage (for advanced users)
pub use storage::DatabaseMetadata;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common LocalRetrieve usage.
///
/// ```rust
/// use localretrieve::prelude::*;
/// ```
pub mod prelude {
    pub use crate::collection::{Collection, ProviderKind};
    pub use crate::config::{Config, EmbeddingDimension, SyncMode};
    pub use crate::document::{Document, NewDocument};
    pub use crate::engine::Engine;
    pub use crate::error::{LocalRetrieveError, Result};
    pub use crate::search::{ModePreference, SearchResult};
    pub use crate::types::{CollectionId, DocumentId, Timestamp};
}
