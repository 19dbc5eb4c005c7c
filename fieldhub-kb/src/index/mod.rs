//! Indexing pipeline: SQLite store, similarity layer, and orchestration.

pub mod indexer;
pub mod search_index;
pub mod source_index;

pub use indexer::{CancelToken, Indexer, IndexerConfig, IndexingReport};
pub use search_index::{EmbeddingModelMetadata, IndexStats, SearchIndex};
pub use source_index::{
    IndexingState, KnowledgeSource, Sensitivity, SourceIndex, SourceRepository, SourceSummary,
    SourceType, StoredChunk,
};
