//! Error taxonomy for knowledge-base indexing and retrieval.
//!
//! The variants draw a hard line between caller bugs (`InvalidConfig`,
//! surfaced before any partial writes), missing references
//! (`SourceNotFound`), and operational failures (`ProviderFailure`,
//! `StoreFailure`), so retrieval callers can distinguish "nothing matched"
//! from "the pipeline broke". Provider failures carry the document and the
//! chunk ordinal where indexing stopped, which is exactly what an operator
//! needs to decide on a reindex.

use fieldhub_chunk::ChunkConfigError;
use fieldhub_embed::EmbedError;

/// Result type for knowledge-base operations.
pub type Result<T> = std::result::Result<T, KbError>;

#[derive(Debug, thiserror::Error)]
pub enum KbError {
    /// Referenced knowledge source does not exist. Not retried.
    #[error("knowledge source not found: {id}")]
    SourceNotFound { id: String },

    /// Embedding generation failed (or timed out) partway through a
    /// document. Chunks with ordinals below `ordinal` were already written
    /// and remain in place; the source's indexing status records the gap.
    #[error("embedding provider failed for source {source_id} at chunk {ordinal}: {source}")]
    ProviderFailure {
        source_id: String,
        ordinal: usize,
        #[source]
        source: EmbedError,
    },

    /// The persistence layer rejected a read, write, or delete. Writes that
    /// already committed are not rolled back.
    #[error("chunk store failure: {source}")]
    StoreFailure {
        #[from]
        source: sqlx::Error,
    },

    /// Query and stored embeddings disagree on vector dimension. Comparing
    /// them would produce meaningless scores, so the whole query fails.
    #[error("embedding dimension mismatch: stored {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Caller-supplied configuration or options are invalid. Raised before
    /// any I/O happens.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Chunking misconfiguration, rejected at construction time.
    #[error(transparent)]
    Chunking(#[from] ChunkConfigError),

    /// Embedding failure outside a per-document indexing run (e.g. while
    /// embedding a search query).
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

impl KbError {
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Wrap a per-document embedding failure with its position.
    pub fn provider_failure(source_id: &str, ordinal: usize, source: EmbedError) -> Self {
        Self::ProviderFailure {
            source_id: source_id.to_string(),
            ordinal,
            source,
        }
    }
}
