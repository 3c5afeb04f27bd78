//! Error types for hybrid ingestion and retrieval.

use thiserror::Error;

use crate::models::IndexStatus;

/// Invalid configuration, schema or query shape.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("vector field not declared in collection schema: {0}")]
    UnknownField(String),

    #[error("vector field {field} expects a {expected} vector")]
    VectorKindMismatch { field: String, expected: &'static str },

    #[error("dimension mismatch for {field}: expected {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("fused query requires at least one prefetch stage")]
    EmptyStages,

    #[error("invalid sparse vector: {0}")]
    InvalidSparseVector(String),
}

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("no embedding endpoint configured for {0} vectors")]
    NotConfigured(&'static str),

    #[error("embedding timeout")]
    Timeout,
}

/// Errors returned by a vector store backend.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("query error: {0}")]
    QueryError(String),

    #[error("payload index error: {0}")]
    PayloadIndexError(String),

    #[error("vector store timeout: {0}")]
    Timeout(String),
}

/// Errors reading records from a batch source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("line {line}: missing field {field}")]
    MissingField { line: usize, field: String },
}

/// Terminal error of an ingestion run. The first failing unit wins.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("embedding failed for batch {batch}: {source}")]
    Embedding {
        batch: u64,
        #[source]
        source: EmbeddingError,
    },

    #[error("upsert failed for batch {batch}: {source}")]
    Upsert {
        batch: u64,
        #[source]
        source: VectorStoreError,
    },

    #[error("invalid batch {batch}: {source}")]
    InvalidBatch {
        batch: u64,
        #[source]
        source: ConfigError,
    },

    #[error("ingestion cancelled after {completed} completed batches")]
    Cancelled { completed: u64 },

    #[error("worker failure: {0}")]
    Worker(String),
}

/// Errors surfaced by the query planner. Never retried.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] VectorStoreError),

    #[error("collection {collection} is not ready for queries (index status: {status})")]
    IndexNotReady {
        collection: String,
        status: IndexStatus,
    },
}

/// Errors raised while waiting for the index build to finish.
#[derive(Debug, Error)]
pub enum IndexBuildError {
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("index build wait cancelled")]
    Cancelled,

    #[error("index not ready after {0:?}")]
    DeadlineExceeded(std::time::Duration),
}
