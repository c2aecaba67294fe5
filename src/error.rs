//! Error types shared across the retrieval and generation pipeline.
//!
//! Each concern has its own enum so callers can tell transient failures
//! (retried locally) from structural ones (surfaced immediately).

use std::time::Duration;

use thiserror::Error;

/// Failure of an embedding provider. A partial batch failure fails the whole call.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding input must contain at least one text")]
    EmptyInput,

    #[error("Embedding batch of {size} texts exceeds the provider limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Embedding provider '{provider}' unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("Embedding provider '{provider}' returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },
}

/// Failure of the vector index.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Always fatal: the provider/collection routing is misconfigured.
    #[error("Dimension mismatch in collection '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Upsert received {documents} documents but {vectors} vectors")]
    LengthMismatch { documents: usize, vectors: usize },

    #[error("Vector store backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },
}

/// A prompt template could not be filled. Indicates a configuration bug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template '{template}' requires slot '{slot}' but no value was supplied")]
    MissingSlot { template: String, slot: String },
}

/// Failure of a single language-model call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("Model invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model provider rate limited the request: {0}")]
    RateLimited(String),

    #[error("Model provider unavailable: {0}")]
    Unavailable(String),

    #[error("Model provider rejected the request: {0}")]
    Rejected(String),
}

impl InvocationError {
    /// Timeouts, rate limits and outages are worth resending; rejections are not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, InvocationError::Rejected(_))
    }
}

/// Failure of the external record store.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed {kind} record {id}: {reason}")]
    Malformed {
        kind: &'static str,
        id: i64,
        reason: String,
    },
}

/// Top-level error of the pipeline. The produced API never lets it escape;
/// it is rendered into a failed response instead.
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),

    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
