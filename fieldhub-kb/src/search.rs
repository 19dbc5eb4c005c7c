//! Semantic retrieval over the indexed corpus.
//!
//! The [`Retriever`] answers "what stored content is close to this query":
//! it embeds the query with the same provider the corpus was indexed with
//! and delegates the ranking to [`SearchIndex::search_similar`]. It has no
//! side effects and owns no state beyond its two collaborators.
//!
//! An empty result set is a normal answer. Provider and store failures keep
//! their own error variants so callers can distinguish "nothing matched"
//! from "the search broke".

use fieldhub_embed::EmbeddingProvider;
use std::sync::Arc;
use tracing::debug;

use crate::error::{KbError, Result};
use crate::index::search_index::SearchIndex;
use crate::index::source_index::{Sensitivity, SourceType, StoredChunk};

/// Options for one retrieval call.
///
/// The defaults are the contract: cosine threshold 0.7, five results, no
/// source-type filter, and a `Public` sensitivity ceiling, so internal
/// content is excluded unless a caller explicitly widens the ceiling. That
/// last default is a security property, not a convenience.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Minimum cosine similarity, in `[0, 1]`
    pub threshold: f32,
    /// Maximum results returned; must be positive
    pub limit: usize,
    /// Restrict results to one source type
    pub source_type: Option<SourceType>,
    /// Highest sensitivity the results may carry
    pub sensitivity: Sensitivity,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            limit: 5,
            source_type: None,
            sensitivity: Sensitivity::Public,
        }
    }
}

impl SearchOptions {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(KbError::invalid_config(format!(
                "similarity threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if self.limit == 0 {
            return Err(KbError::invalid_config("result limit must be positive"));
        }
        Ok(())
    }
}

/// One ranked retrieval hit.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity to the query, higher is closer
    pub score: f32,
}

/// Answers similarity queries against the chunk store.
#[derive(Clone)]
pub struct Retriever {
    index: SearchIndex,
    provider: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(index: SearchIndex, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, provider }
    }

    /// Retrieve the chunks closest to `query`, best first.
    ///
    /// The query must be non-empty and the options in range; both are
    /// validated before any I/O. If the store already holds vectors of a
    /// different dimension than this retriever's provider produces, the
    /// call fails with [`KbError::DimensionMismatch`] without embedding the
    /// query. Nothing clearing the threshold yields `Ok` with an empty
    /// vector.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(KbError::invalid_config("query text must not be empty"));
        }
        options.validate()?;

        if let Some(stored) = self.index.stored_dimension().await? {
            if stored != self.provider.dimension() {
                return Err(KbError::DimensionMismatch {
                    expected: stored,
                    actual: self.provider.dimension(),
                });
            }
        }

        let query_embedding = self.provider.embed_text(query).await?;
        let matches = self
            .index
            .search_similar(
                &query_embedding,
                options.threshold,
                options.limit,
                options.source_type,
                options.sensitivity,
            )
            .await?;

        debug!(query_len = query.len(), results = matches.len(), "search complete");

        Ok(matches
            .into_iter()
            .map(|(chunk, score)| SearchResult { chunk, score })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldhub_embed::HashEmbeddingProvider;

    #[tokio::test]
    async fn rejects_empty_query_and_bad_options() {
        let index = SearchIndex::open_memory().await.unwrap();
        let provider = Arc::new(HashEmbeddingProvider::new(16).unwrap());
        let retriever = Retriever::new(index, provider);

        let empty = retriever.search("   ", &SearchOptions::default()).await;
        assert!(matches!(empty, Err(KbError::InvalidConfig { .. })));

        let bad_limit = retriever
            .search("filters", &SearchOptions::default().with_limit(0))
            .await;
        assert!(matches!(bad_limit, Err(KbError::InvalidConfig { .. })));

        let bad_threshold = retriever
            .search("filters", &SearchOptions::default().with_threshold(1.5))
            .await;
        assert!(matches!(bad_threshold, Err(KbError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn empty_corpus_returns_no_results() {
        let index = SearchIndex::open_memory().await.unwrap();
        let provider = Arc::new(HashEmbeddingProvider::new(16).unwrap());
        let retriever = Retriever::new(index, provider);

        let results = retriever
            .search("compressor maintenance", &SearchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
