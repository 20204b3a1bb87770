//! Error types for LocalRetrieve.
//!
//! A hierarchical error system mirrors the boundary error codes a host needs
//! to match on: `LocalRetrieveError` is the top-level error returned by
//! every public API; each variant carries (or wraps) a more specific error
//! and maps to a stable `code()` string.
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use localretrieve::{Engine, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let engine = Engine::open("./search.db", Config::default())?;
//!     // ... operations that may fail ...
//!     engine.close()?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for LocalRetrieve operations.
pub type Result<T> = std::result::Result<T, LocalRetrieveError>;

/// Top-level error enum for all LocalRetrieve operations.
///
/// Use [`LocalRetrieveError::code`] for the stable machine-readable code
/// and [`LocalRetrieveError::recovery`] for the recovery policy.
#[derive(Debug, Error)]
pub enum LocalRetrieveError {
    /// Storage layer error (I/O, corruption, transactions).
    #[error("Database error: {0}")]
    Database(#[from] StorageError),

    /// Vector index error (HNSW operations).
    #[error("Vector index error: {0}")]
    Vector(String),

    /// Full-text index error.
    #[error("FTS index error: {0}")]
    Fts(String),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// Requested entity not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Embedding dimension mismatch.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from collection configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// Embedding provider error, with a provider-specific sub-code.
    #[error("Provider error ({kind:?}): {message}")]
    Provider {
        /// Sub-code classifying the provider failure.
        kind: ProviderErrorKind,
        /// Human-readable detail.
        message: String,
    },

    /// Cache tier error.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// RPC transport error (timeouts, rate limiting, unknown method, transport shutdown).
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    /// The engine (or a component requiring it) has not been initialized yet.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LocalRetrieveError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a vector index error with the given message.
    pub fn vector(msg: impl Into<String>) -> Self {
        Self::Vector(msg.into())
    }

    /// Creates an FTS index error with the given message.
    pub fn fts(msg: impl Into<String>) -> Self {
        Self::Fts(msg.into())
    }

    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates a provider error.
    pub fn provider(kind: ProviderErrorKind, msg: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            message: msg.into(),
        }
    }

    /// Stable machine-readable error code, matching the boundary error list.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Vector(_) => "VECTOR_ERROR",
            Self::Fts(_) => "DATABASE_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::Provider { kind, .. } => kind.code(),
            Self::Cache(_) => "CACHE_ERROR",
            Self::Rpc(e) => e.code(),
            Self::NotInitialized(_) => "NOT_INITIALIZED",
            Self::Io(_) => "OPFS_ERROR",
        }
    }

    /// Recovery policy for this error.
    pub fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Rpc(RpcError::Timeout { .. }) | Self::Rpc(RpcError::RateLimit) => {
                RecoveryInfo::retryable(None)
            }
            Self::Provider {
                kind: ProviderErrorKind::Network | ProviderErrorKind::RateLimit,
                ..
            } => RecoveryInfo::retryable(Some(Duration::from_secs(1))),
            Self::Provider {
                kind: ProviderErrorKind::Quota,
                ..
            } => RecoveryInfo {
                can_retry: true,
                retry_after: Some(Duration::from_secs(60)),
                max_retries: Some(3),
                fallback_available: true,
                user_action_required: None,
                suggested_actions: vec!["check provider quota/billing".into()],
            },
            Self::Provider {
                kind: ProviderErrorKind::Auth,
                ..
            } => RecoveryInfo::user_action("fix the provider API key"),
            Self::Provider {
                kind: ProviderErrorKind::Config | ProviderErrorKind::Validation,
                ..
            }
            | Self::Validation(_)
            | Self::Config { .. } => RecoveryInfo::user_action("fix the invalid input/config"),
            Self::Cache(_) => RecoveryInfo {
                can_retry: true,
                retry_after: None,
                max_retries: None,
                fallback_available: true,
                user_action_required: None,
                suggested_actions: vec!["bypass cache and recompute".into()],
            },
            Self::Rpc(_) => RecoveryInfo::retryable(None),
            Self::Database(_) | Self::Vector(_) | Self::Fts(_) => RecoveryInfo {
                can_retry: false,
                retry_after: None,
                max_retries: None,
                fallback_available: true,
                user_action_required: None,
                suggested_actions: vec!["degrade gracefully to the surviving search mode".into()],
            },
            Self::DimensionMismatch { .. } => RecoveryInfo::user_action(
                "the embedding dimension does not match the collection; migrate or recreate it",
            ),
            Self::NotFound(_) | Self::NotInitialized(_) | Self::Io(_) => RecoveryInfo::default(),
        }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Sub-codes for embedding provider failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Authentication failed (bad/expired API key).
    Auth,
    /// Provider quota exceeded.
    Quota,
    /// Transient network failure (timeout, connection reset, 5xx).
    Network,
    /// Rate limited (HTTP 429).
    RateLimit,
    /// Static configuration problem (bad base URL, unsupported model, ...).
    Config,
    /// Input failed provider-side validation (too long, empty, ...).
    Validation,
    /// Model failed to load or initialize.
    ModelLoad,
}

impl ProviderErrorKind {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth => "AUTH_ERROR",
            Self::Quota => "QUOTA_EXCEEDED",
            Self::Network => "NETWORK_ERROR",
            Self::RateLimit => "RATE_LIMIT",
            Self::Config => "CONFIG_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::ModelLoad => "MODEL_LOAD_ERROR",
        }
    }
}

/// Recovery information attached to every user-visible failure.
#[derive(Clone, Debug, Default)]
pub struct RecoveryInfo {
    /// Whether the caller should retry.
    pub can_retry: bool,
    /// Suggested delay before retrying.
    pub retry_after: Option<Duration>,
    /// Maximum number of retries recommended.
    pub max_retries: Option<u32>,
    /// Whether a degraded fallback path exists.
    pub fallback_available: bool,
    /// A human-readable description of the action the user must take, if any.
    pub user_action_required: Option<String>,
    /// Concrete suggested next steps.
    pub suggested_actions: Vec<String>,
}

impl RecoveryInfo {
    fn retryable(retry_after: Option<Duration>) -> Self {
        Self {
            can_retry: true,
            retry_after,
            max_retries: Some(3),
            fallback_available: false,
            user_action_required: None,
            suggested_actions: vec!["retry with backoff".into()],
        }
    }

    fn user_action(action: &str) -> Self {
        Self {
            can_retry: false,
            retry_after: None,
            max_retries: None,
            fallback_available: false,
            user_action_required: Some(action.to_string()),
            suggested_actions: vec![action.to_string()],
        }
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database file or data is corrupted.
    #[error("Database corrupted: {0}")]
    Corrupted(String),

    /// Database file not found at expected path.
    #[error("Database not found: {0}")]
    DatabaseNotFound(PathBuf),

    /// Database is locked by another process.
    #[error("Database is locked by another writer")]
    DatabaseLocked,

    /// Transaction failed (commit, rollback, etc.).
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Database schema version doesn't match expected version.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in database.
        found: u32,
    },

    /// Table not found in database.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The engine has already been closed.
    #[error("Storage is not open")]
    NotOpen,
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a redb error with the given message.
    pub fn redb(msg: impl Into<String>) -> Self {
        Self::Redb(msg.into())
    }
}

// Conversions from redb error types.
impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}
impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}
impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}
impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("Commit failed: {}", err))
    }
}
impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("Table error: {}", err))
    }
}
impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("Storage error: {}", err))
    }
}
impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Convenience direct conversions to LocalRetrieveError.
impl From<redb::Error> for LocalRetrieveError {
    fn from(err: redb::Error) -> Self {
        LocalRetrieveError::Database(StorageError::from(err))
    }
}
impl From<redb::DatabaseError> for LocalRetrieveError {
    fn from(err: redb::DatabaseError) -> Self {
        LocalRetrieveError::Database(StorageError::from(err))
    }
}
impl From<redb::TransactionError> for LocalRetrieveError {
    fn from(err: redb::TransactionError) -> Self {
        LocalRetrieveError::Database(StorageError::from(err))
    }
}
impl From<redb::CommitError> for LocalRetrieveError {
    fn from(err: redb::CommitError) -> Self {
        LocalRetrieveError::Database(StorageError::from(err))
    }
}
impl From<redb::TableError> for LocalRetrieveError {
    fn from(err: redb::TableError) -> Self {
        LocalRetrieveError::Database(StorageError::from(err))
    }
}
impl From<redb::StorageError> for LocalRetrieveError {
    fn from(err: redb::StorageError) -> Self {
        LocalRetrieveError::Database(StorageError::from(err))
    }
}
impl From<bincode::Error> for LocalRetrieveError {
    fn from(err: bincode::Error) -> Self {
        LocalRetrieveError::Database(StorageError::from(err))
    }
}

/// Validation errors for input data.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Embedding dimension doesn't match collection's configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from collection configuration.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Content exceeds maximum allowed size.
    #[error("Content too large: {size} bytes (max: {max} bytes)")]
    ContentTooLarge {
        /// Actual content size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// Too many items in a collection field.
    #[error("Too many items in '{field}': {count} (max: {max})")]
    TooManyItems {
        /// Name of the field.
        field: String,
        /// Actual count.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Query is empty.
    #[error("Query must not be empty")]
    EmptyQuery,

    /// Query exceeds the maximum length.
    #[error("Query too long: {len} characters (max {max})")]
    QueryTooLong {
        /// Actual length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// An embedding contains a non-finite component (NaN or infinite).
    #[error("Embedding contains a non-finite component at index {index}")]
    NonFiniteComponent {
        /// Index of the offending component.
        index: usize,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a content too large error.
    pub fn content_too_large(size: usize, max: usize) -> Self {
        Self::ContentTooLarge { size, max }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates a too many items error.
    pub fn too_many_items(field: impl Into<String>, count: usize, max: usize) -> Self {
        Self::TooManyItems {
            field: field.into(),
            count,
            max,
        }
    }
}

/// Not found errors for specific entity types.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Collection with given ID or name not found.
    #[error("Collection not found: {0}")]
    Collection(String),

    /// Document with given ID not found.
    #[error("Document not found: {0}")]
    Document(String),

    /// Queue item with given ID not found.
    #[error("Queue item not found: {0}")]
    QueueItem(String),
}

impl NotFoundError {
    /// Creates a collection not found error.
    pub fn collection(id: impl ToString) -> Self {
        Self::Collection(id.to_string())
    }

    /// Creates a document not found error.
    pub fn document(id: impl ToString) -> Self {
        Self::Document(id.to_string())
    }

    /// Creates a queue item not found error.
    pub fn queue_item(id: impl ToString) -> Self {
        Self::QueueItem(id.to_string())
    }
}

/// Cache tier errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A single tier failed; the coordinator logs and continues.
    #[error("Cache tier '{tier}' failed: {message}")]
    TierFailed {
        /// Which tier failed (`memory`, `disk`, `sql`).
        tier: &'static str,
        /// Failure detail.
        message: String,
    },

    /// Every enabled tier failed; this does propagate.
    #[error("All cache tiers failed for key '{key}'")]
    AllTiersFailed {
        /// The cache key that could not be written/read anywhere.
        key: String,
    },
}

/// RPC transport errors.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Too many in-flight calls.
    #[error("Too many in-flight RPC calls")]
    RateLimit,

    /// Call exceeded its deadline.
    #[error("RPC call '{method}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// Method name that timed out.
        method: String,
        /// Elapsed time in milliseconds.
        elapsed_ms: u64,
    },

    /// Method name not registered on the worker side.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// The transport was shut down; no further calls are accepted.
    #[error("RPC transport terminated")]
    Terminated,

    /// A registered handler raised an error.
    #[error("Handler error ({code}): {message}")]
    Handler {
        /// Handler-reported error code.
        code: String,
        /// Handler-reported message.
        message: String,
    },

    /// Failed to send a request to the worker task (channel closed).
    #[error("Failed to send RPC request: {0}")]
    SendError(String),
}

impl RpcError {
    fn code(&self) -> &'static str {
        match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::Timeout { .. } => "TIMEOUT",
            Self::UnknownMethod(_) => "UNKNOWN_METHOD",
            Self::Terminated => "WORKER_ERROR",
            Self::Handler { .. } => "WORKER_ERROR",
            Self::SendError(_) => "SEND_ERROR",
        }
    }
}
