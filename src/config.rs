//! Configuration types for LocalRetrieve.
//!
//! The [`Config`] struct controls engine behavior including:
//! - Embedding provider (local deterministic model or an HTTPS provider)
//! - Embedding dimension
//! - Vector index tuning (`VectorIndexConfig`, HNSW parameters)
//! - Cache tier sizing and TTLs (`CacheConfig`)
//! - RPC transport limits (`RpcConfig`)
//!
//! # Example
//! ```rust
//! use localretrieve::{Config, SyncMode};
//!
//! // Use defaults (local provider, 384 dimensions)
//! let config = Config::default();
//!
//! // Customize for production
//! let config = Config {
//!     cache_size_mb: 128,
//!     sync_mode: SyncMode::Normal,
//!     ..Default::default()
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::CollectionId;

/// Engine configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use localretrieve::Config;
///
/// let config = Config {
///     cache_size_mb: 256,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// How embeddings are generated for documents without a caller-supplied vector.
    pub embedding_provider: EmbeddingProvider,

    /// Embedding vector dimension (must match provider output).
    pub embedding_dimension: EmbeddingDimension,

    /// Default collection for operations when none specified.
    pub default_collection: Option<CollectionId>,

    /// Cache size in megabytes for the storage engine's page cache.
    ///
    /// Higher values improve read performance but use more memory.
    /// Default: 64 MB
    pub cache_size_mb: usize,

    /// Durability mode for write operations.
    pub sync_mode: SyncMode,

    /// HNSW vector index parameters.
    pub vector_index: VectorIndexConfig,

    /// Three-tier query-result/embedding cache parameters.
    pub cache: CacheConfig,

    /// RPC transport limits (concurrency cap, per-call timeout).
    pub rpc: RpcConfig,

    /// Embedding provider runtime parameters (batch size, timeouts, rate limit).
    pub provider: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Local is the safe default - no network dependency required.
            embedding_provider: EmbeddingProvider::Local,
            embedding_dimension: EmbeddingDimension::D384,
            default_collection: None,
            cache_size_mb: 64,
            sync_mode: SyncMode::Normal,
            vector_index: VectorIndexConfig::default(),
            cache: CacheConfig::default(),
            rpc: RpcConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config using the local deterministic embedding provider.
    ///
    /// # Example
    /// ```rust
    /// use localretrieve::Config;
    ///
    /// let config = Config::with_local_embeddings();
    /// ```
    pub fn with_local_embeddings() -> Self {
        Self {
            embedding_provider: EmbeddingProvider::Local,
            ..Default::default()
        }
    }

    /// Creates a Config using the OpenAI HTTPS embedding provider.
    ///
    /// Requires the `openai` feature. The API key is read from `api_key_env`
    /// at provider initialization time, never stored in the config itself.
    ///
    /// # Example
    /// ```rust
    /// use localretrieve::{Config, EmbeddingDimension};
    ///
    /// let config = Config::with_openai_embeddings(EmbeddingDimension::Custom(1536));
    /// ```
    pub fn with_openai_embeddings(dimension: EmbeddingDimension) -> Self {
        Self {
            embedding_provider: EmbeddingProvider::OpenAi {
                model: "text-embedding-3-small".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
            },
            embedding_dimension: dimension,
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `Engine::open()`. You can also call this
    /// explicitly to check configuration before attempting to open.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cache_size_mb == 0 {
            return Err(ValidationError::invalid_field(
                "cache_size_mb",
                "must be greater than 0",
            ));
        }

        self.vector_index.validate()?;
        self.cache.validate()?;
        self.rpc.validate()?;
        self.provider.validate()?;

        if let EmbeddingDimension::Custom(dim) = self.embedding_dimension {
            if dim == 0 {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    "custom dimension must be greater than 0",
                ));
            }
            if dim > 4096 {
                return Err(ValidationError::invalid_field(
                    "embedding_dimension",
                    "custom dimension must not exceed 4096",
                ));
            }
        }

        Ok(())
    }

    /// Returns the embedding dimension as a numeric value.
    pub fn dimension(&self) -> usize {
        self.embedding_dimension.size()
    }
}

/// Embedding provider selection.
#[derive(Clone, Debug)]
pub enum EmbeddingProvider {
    /// A deterministic, in-process embedding provider (no network, no model
    /// download). This is the engine's bundled default.
    Local,

    /// OpenAI-compatible HTTPS embedding provider.
    ///
    /// Requires the `openai` feature.
    OpenAi {
        /// Model name, e.g. `text-embedding-3-small`.
        model: String,
        /// Name of the environment variable holding the API key.
        api_key_env: String,
    },

    /// Caller provides pre-computed embedding vectors for every document.
    External,
}

impl EmbeddingProvider {
    /// Returns true if this is the local provider.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// Returns true if this is the OpenAI provider.
    pub fn is_openai(&self) -> bool {
        matches!(self, Self::OpenAi { .. })
    }

    /// Returns true if this is the external provider.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External)
    }
}

/// Embedding vector dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingDimension {
    /// 384 dimensions (the local provider's native output).
    #[default]
    D384,

    /// 768 dimensions (bge-base-en-v1.5, BERT-base class models).
    D768,

    /// Custom dimension for other embedding models. Must be between 1 and 4096.
    Custom(usize),
}

impl EmbeddingDimension {
    /// Returns the numeric size of this dimension.
    ///
    /// # Example
    /// ```rust
    /// use localretrieve::EmbeddingDimension;
    ///
    /// assert_eq!(EmbeddingDimension::D384.size(), 384);
    /// assert_eq!(EmbeddingDimension::D768.size(), 768);
    /// assert_eq!(EmbeddingDimension::Custom(1536).size(), 1536);
    /// ```
    #[inline]
    pub const fn size(&self) -> usize {
        match self {
            Self::D384 => 384,
            Self::D768 => 768,
            Self::Custom(n) => *n,
        }
    }
}

/// Durability mode for write operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync to disk on transaction commit. Default and recommended.
    #[default]
    Normal,

    /// Async sync (faster writes, may lose recent data on crash).
    Fast,

    /// Sync every write operation (slowest, maximum durability).
    Paranoid,
}

impl SyncMode {
    /// Returns true if this mode syncs on every write.
    pub fn is_paranoid(&self) -> bool {
        matches!(self, Self::Paranoid)
    }

    /// Returns true if this mode is async (may lose data on crash).
    pub fn is_fast(&self) -> bool {
        matches!(self, Self::Fast)
    }
}

/// Configuration for the per-collection HNSW vector index.
///
/// # Tuning Guide
///
/// | Use Case     | M  | ef_construction | ef_search |
/// |--------------|----|-----------------|-----------|
/// | Low memory   |  8 |             100 |        30 |
/// | Balanced     | 16 |             200 |        50 |
/// | High recall  | 32 |             400 |       100 |
#[derive(Clone, Debug)]
pub struct VectorIndexConfig {
    /// Maximum bidirectional connections per node (M parameter). Default: 16
    pub max_nb_connection: usize,

    /// Candidates tracked during index construction. Default: 200
    pub ef_construction: usize,

    /// Candidates tracked during search. Must be >= k. Default: 50
    pub ef_search: usize,

    /// Maximum number of layers in the skip-list structure. Default: 16
    pub max_layer: usize,

    /// Initial pre-allocated capacity (number of vectors). Default: 10_000
    pub max_elements: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 50,
            max_layer: 16,
            max_elements: 10_000,
        }
    }
}

impl VectorIndexConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_nb_connection == 0 {
            return Err(ValidationError::invalid_field(
                "vector_index.max_nb_connection",
                "must be greater than 0",
            ));
        }
        if self.ef_construction == 0 {
            return Err(ValidationError::invalid_field(
                "vector_index.ef_construction",
                "must be greater than 0",
            ));
        }
        if self.ef_search == 0 {
            return Err(ValidationError::invalid_field(
                "vector_index.ef_search",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Three-tier cache sizing and TTLs (spec §4.5).
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Maximum entries held in the in-memory tier.
    pub memory_max_entries: usize,
    /// Approximate memory budget for the in-memory tier, in megabytes.
    pub memory_max_mb: usize,
    /// TTL for in-memory entries.
    pub memory_ttl: Duration,
    /// TTL for disk-tier (IndexedDB-equivalent) entries.
    pub disk_ttl: Duration,
    /// TTL for the primary-database cache table entries.
    pub sql_ttl: Duration,
    /// Eviction strategy for the in-memory tier.
    pub eviction: EvictionStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_entries: 1000,
            memory_max_mb: 100,
            memory_ttl: Duration::from_secs(5 * 60),
            disk_ttl: Duration::from_secs(24 * 60 * 60),
            sql_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            eviction: EvictionStrategy::Lru,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.memory_max_entries == 0 {
            return Err(ValidationError::invalid_field(
                "cache.memory_max_entries",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Cache eviction strategy for the in-memory tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionStrategy {
    /// Evict least-recently-used entries first.
    #[default]
    Lru,
    /// Evict least-frequently-used entries first.
    Lfu,
    /// Evict lowest-priority entries first.
    Priority,
    /// Score = `priority*1000 + frequency*100 - age_seconds`, evict lowest.
    Hybrid,
}

/// RPC transport limits (spec §4.1).
#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// Maximum number of in-flight calls before failing fast with `RateLimit`.
    pub max_concurrent_calls: usize,
    /// Default per-call timeout.
    pub call_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RpcConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_calls == 0 {
            return Err(ValidationError::invalid_field(
                "rpc.max_concurrent_calls",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Embedding provider runtime parameters (spec §4.4).
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Maximum number of texts per batch embedding call.
    pub max_batch_size: usize,
    /// Maximum text length accepted per document (characters).
    pub max_text_length: usize,
    /// Per-call deadline for the local provider.
    pub local_timeout: Duration,
    /// Per-call deadline for HTTPS providers.
    pub http_timeout: Duration,
    /// Requests-per-minute budget for the token-bucket rate limiter (HTTPS providers).
    pub requests_per_minute: u32,
    /// Maximum backoff delay for HTTPS retries.
    pub max_backoff: Duration,
    /// Idle provider eviction period; unused providers are disposed after this.
    pub idle_eviction: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 96,
            max_text_length: 8192,
            local_timeout: Duration::from_secs(10),
            http_timeout: Duration::from_secs(30),
            requests_per_minute: 3000,
            max_backoff: Duration::from_secs(30),
            idle_eviction: Duration::from_secs(30 * 60),
        }
    }
}

impl ProviderConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_batch_size == 0 {
            return Err(ValidationError::invalid_field(
                "provider.max_batch_size",
                "must be greater than 0",
            ));
        }
        if self.max_text_length == 0 {
            return Err(ValidationError::invalid_field(
                "provider.max_text_length",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Advisory storage-engine open pragmas, accepted for parity with SQL-based
/// embedded databases even though redb does not need all of them.
#[derive(Clone, Debug, Default)]
pub struct StoragePragmas {
    /// Durability mode, mirrors `Config::sync_mode`.
    pub synchronous: SyncMode,
    /// Page cache budget in megabytes.
    pub cache_size_mb: usize,
    /// Accepted for interface parity; redb has no temp_store knob, so this
    /// is logged and ignored rather than silently misrepresented.
    pub temp_store: Option<PathBuf>,
}
