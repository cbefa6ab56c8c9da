//! Error types for all cursordyn operations.

use std::io;
use thiserror::Error;

/// Top-level error type for cursordyn operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{remaining} keys still unprocessed after {attempts} batch-get attempts")]
    UnprocessedKeys { remaining: usize, attempts: usize },

    #[error("failed to deserialize item: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// The table or service is configured in a way that makes the call impossible.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("index not found: {0}")]
    UnknownIndex(String),

    #[error("index '{0}' does not declare a sort key")]
    MissingSortKey(String),

    #[error("no cursor secret configured for table '{0}'")]
    MissingCursorSecret(String),

    #[error("table '{table}' has no primary index '{index}'")]
    MissingPrimaryIndex { table: String, index: String },

    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_json::Error),
}

/// The caller's request is malformed. Raised before any store call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("partition key condition for '{0}' is required")]
    PartitionKeyRequired(String),

    #[error("partition key '{0}' must be compared to a string or number")]
    PartitionKeyNotScalar(String),

    #[error("sort key condition on '{attribute}' but index '{index}' has no sort key")]
    SortKeyNotSupported { index: String, attribute: String },

    #[error(
        "index '{0}' declares a sort key; supply a sort key condition or query the whole partition explicitly"
    )]
    SortKeyConditionRequired(String),

    #[error("attribute '{0}' is not a key of the queried index")]
    UnknownKeyAttribute(String),

    #[error("sort key '{0}' must be compared to a string or number")]
    SortKeyNotScalar(String),

    #[error("begins_with on '{0}' requires a string prefix")]
    BeginsWithRequiresString(String),

    #[error("between on '{0}' requires low <= high of the same type")]
    InvalidBetween(String),

    #[error("page size {requested} exceeds the maximum of {max}")]
    PageSizeExceeded { requested: usize, max: usize },

    #[error("page size must be at least 1")]
    ZeroPageSize,

    #[error("key is missing attribute '{0}'")]
    MissingKeyAttribute(String),
}

/// A cursor could not be authenticated or decoded.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("malformed cursor")]
    Malformed,

    #[error("unsupported cursor version: {0}")]
    UnsupportedVersion(u8),

    #[error("cursor failed authentication")]
    Authentication,

    #[error("cursor does not carry key attribute '{0}'")]
    KeyMismatch(String),

    #[error("failed to encrypt cursor")]
    Encrypt,
}

/// Failures reported by a [`StoreClient`](crate::store::StoreClient).
///
/// The access layer never interprets these; they reach the caller unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("invalid key condition expression: {0}")]
    InvalidExpression(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("too many keys in batch request: {actual} > {max}")]
    TooManyKeys { max: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
