//! Orchestration of the chunk → embed → store pipeline.
//!
//! The [`Indexer`] brings a knowledge source's chunk set up to date: it
//! reads the source through the [`SourceRepository`] capability, splits the
//! content with the configured [`WordChunker`], embeds each segment with the
//! configured [`EmbeddingProvider`], and writes [`StoredChunk`]s with
//! ordinals taken from the chunking sequence.
//!
//! ## Operations
//!
//! - [`Indexer::index_document`]: index one source. Not idempotent on its
//!   own: the store's ordinal uniqueness rejects a second run, and callers
//!   wanting idempotency use the other two operations.
//! - [`Indexer::index_all_pending`]: corpus-level idempotent sweep driven by
//!   the persisted per-source indexing status.
//! - [`Indexer::reindex_document`]: delete-then-recreate, the only way to
//!   update a changed document.
//!
//! ## Failure model
//!
//! Embedding and store calls are the suspension points; both are fallible
//! and the embedding side is time-boxed so one hung provider call cannot
//! stall a corpus sweep. When a provider call fails partway through a
//! document, the chunks already written stay in place, the source's status
//! row records `failed` plus the first unwritten ordinal, and the error
//! carries the same coordinates. A later `index_all_pending` repairs such
//! sources through the reindex path. Ordinal numbering always comes from
//! the chunking step, so a failure can truncate a document's chunk set but
//! never leave a gap in it.
//!
//! Documents are independent: per-document failures are collected in the
//! [`IndexingReport`] without aborting the sweep, and a sweep can be
//! cancelled between documents with a [`CancelToken`].

use fieldhub_chunk::{TextSegment, WordChunker};
use fieldhub_embed::{EmbedError, EmbeddingProvider};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::search_index::{EmbeddingModelMetadata, SearchIndex};
use super::source_index::{IndexingState, SourceRepository, StoredChunk};
use crate::error::{KbError, Result};

/// Configuration for an [`Indexer`].
///
/// The chunking config arrives already validated (its constructor rejects
/// `overlap >= size`), so a misconfigured chunker can never start an
/// indexing run, let alone fail it halfway through.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Chunking parameters shared by every document this indexer touches
    pub chunking: fieldhub_chunk::ChunkingConfig,
    /// Upper bound for one embedding batch call
    pub embed_timeout: Duration,
    /// Segments embedded (and written) per batch
    pub embed_batch_size: usize,
}

impl IndexerConfig {
    pub fn new(chunking: fieldhub_chunk::ChunkingConfig) -> Self {
        Self {
            chunking,
            embed_timeout: Duration::from_secs(30),
            embed_batch_size: 16,
        }
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn with_embed_batch_size(mut self, batch_size: usize) -> Self {
        self.embed_batch_size = batch_size.max(1);
        self
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::new(fieldhub_chunk::ChunkingConfig::default())
    }
}

/// Cooperative cancellation flag for corpus sweeps.
///
/// Observed between documents only: cancelling mid-sweep never interrupts
/// the document currently being written.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One failed document in a corpus sweep.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingFailure {
    pub source_id: String,
    pub message: String,
}

/// Outcome of an [`Indexer::index_all_pending`] sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexingReport {
    pub sources_indexed: usize,
    pub sources_skipped: usize,
    pub chunks_created: usize,
    pub failures: Vec<IndexingFailure>,
    pub cancelled: bool,
}

/// Orchestrates chunking, embedding, and chunk storage for the corpus.
///
/// Methods take `&self` and documents share no mutable state, so callers
/// may index different sources concurrently on clones of the same indexer;
/// within one document the pipeline is sequential because ordinal
/// assignment follows the chunk order.
#[derive(Clone)]
pub struct Indexer {
    sources: Arc<dyn SourceRepository>,
    index: SearchIndex,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: WordChunker,
    config: IndexerConfig,
}

impl Indexer {
    /// Build an indexer and register its embedding model with the index.
    ///
    /// A previously registered model of a different dimension is logged as a
    /// warning: queries against the old chunks will fail with a dimension
    /// mismatch until the affected sources are reindexed.
    pub async fn new(
        sources: Arc<dyn SourceRepository>,
        index: SearchIndex,
        provider: Arc<dyn EmbeddingProvider>,
        config: IndexerConfig,
    ) -> Result<Self> {
        let metadata =
            EmbeddingModelMetadata::new(provider.provider_name(), provider.dimension());
        for registered in index.registered_models().await? {
            if registered.dimension != metadata.dimension {
                warn!(
                    registered = %registered.model_id(),
                    current = %metadata.model_id(),
                    "embedding dimension changed; previously indexed chunks need reindexing"
                );
            }
        }
        index.register_embedding_model(&metadata).await?;

        Ok(Self {
            sources,
            index,
            provider,
            chunker: WordChunker::new(config.chunking.clone()),
            config,
        })
    }

    /// Index one source, writing its chunks with dense ordinals.
    ///
    /// Returns the number of chunks created. Fails with
    /// [`KbError::SourceNotFound`] for an unknown id. Running this twice for
    /// the same source without deleting its chunks first is a caller error
    /// and is rejected by the store's ordinal uniqueness.
    pub async fn index_document(&self, source_id: &str) -> Result<usize> {
        let source = self
            .sources
            .get_source(source_id)
            .await?
            .ok_or_else(|| KbError::SourceNotFound {
                id: source_id.to_string(),
            })?;

        let segments: Vec<TextSegment> = self.chunker.segments(&source.content).collect();
        debug!(source_id, segments = segments.len(), "chunked source");

        self.index
            .set_indexing_state(source_id, IndexingState::Indexing, None, None)
            .await?;

        let mut written = 0usize;
        for window in segments.chunks(self.config.embed_batch_size) {
            let first_ordinal = window[0].sequence;
            let texts: Vec<String> = window.iter().map(|s| s.text.clone()).collect();

            let embedded = match tokio::time::timeout(
                self.config.embed_timeout,
                self.provider.embed_texts(&texts),
            )
            .await
            {
                Ok(Ok(batch)) => batch,
                Ok(Err(e)) => return self.fail_document(source_id, first_ordinal, e).await,
                Err(elapsed) => {
                    return self
                        .fail_document(source_id, first_ordinal, EmbedError::embedding_gen(elapsed))
                        .await;
                }
            };

            if embedded.len() != window.len() {
                let e = EmbedError::invalid_config(format!(
                    "provider returned {} embeddings for {} texts",
                    embedded.len(),
                    window.len()
                ));
                return self.fail_document(source_id, first_ordinal, e).await;
            }
            for embedding in &embedded.embeddings {
                if embedding.len() != self.provider.dimension() {
                    self.index
                        .set_indexing_state(
                            source_id,
                            IndexingState::Failed,
                            Some(first_ordinal),
                            Some("embedding dimension mismatch"),
                        )
                        .await?;
                    return Err(KbError::DimensionMismatch {
                        expected: self.provider.dimension(),
                        actual: embedding.len(),
                    });
                }
            }

            let chunks: Vec<StoredChunk> = window
                .iter()
                .zip(embedded.embeddings)
                .map(|(segment, embedding)| StoredChunk {
                    id: None,
                    source_id: source.id.clone(),
                    // Ordinal comes from the chunking sequence, never from
                    // embedding completion order.
                    ordinal: segment.sequence,
                    text: segment.text.clone(),
                    word_count: segment.word_count,
                    embedding,
                    title: source.title.clone(),
                    source_type: source.source_type,
                    category: source.category.clone(),
                })
                .collect();

            if let Err(e) = self.index.insert_chunks(&chunks).await {
                self.index
                    .set_indexing_state(
                        source_id,
                        IndexingState::Failed,
                        Some(first_ordinal),
                        Some(&e.to_string()),
                    )
                    .await?;
                return Err(e);
            }
            written += chunks.len();
        }

        self.index
            .set_indexing_state(source_id, IndexingState::Indexed, None, None)
            .await?;
        info!(source_id, chunks = written, "indexed source");
        Ok(written)
    }

    /// Delete a source's chunks and index it afresh.
    ///
    /// The only supported way to update a changed document: ordinal
    /// continuity after a content edit cannot be established without
    /// re-chunking from scratch.
    pub async fn reindex_document(&self, source_id: &str) -> Result<usize> {
        if self.sources.get_source(source_id).await?.is_none() {
            return Err(KbError::SourceNotFound {
                id: source_id.to_string(),
            });
        }

        let removed = self.index.delete_chunks_for_source(source_id).await?;
        debug!(source_id, removed, "cleared chunks for reindex");
        self.index_document(source_id).await
    }

    /// Bring every active source's chunk set up to date.
    ///
    /// Driven by the persisted indexing status: `indexed` sources are
    /// skipped, `failed` (or crashed-mid-run `indexing`) sources are
    /// repaired via [`reindex_document`](Self::reindex_document), and the
    /// rest are indexed. Each source is handled at most once per sweep, and
    /// successfully indexed sources are never re-embedded.
    ///
    /// Per-document failures land in the report; they do not stop the sweep.
    /// The sweep checks `cancel` before each document.
    pub async fn index_all_pending(&self, cancel: &CancelToken) -> Result<IndexingReport> {
        let mut report = IndexingReport::default();
        let active = self.sources.list_active_sources().await?;
        info!(sources = active.len(), "starting corpus sweep");

        for summary in active {
            if cancel.is_cancelled() {
                warn!("corpus sweep cancelled");
                report.cancelled = true;
                break;
            }

            let outcome = match self.index.indexing_state(&summary.id).await? {
                IndexingState::Indexed => {
                    report.sources_skipped += 1;
                    continue;
                }
                IndexingState::Failed | IndexingState::Indexing => {
                    self.reindex_document(&summary.id).await
                }
                IndexingState::NotIndexed => {
                    if self.index.chunk_count_for_source(&summary.id).await? > 0 {
                        // Chunks that predate status tracking; adopt them.
                        self.index
                            .set_indexing_state(&summary.id, IndexingState::Indexed, None, None)
                            .await?;
                        report.sources_skipped += 1;
                        continue;
                    }
                    self.index_document(&summary.id).await
                }
            };

            match outcome {
                Ok(count) => {
                    report.sources_indexed += 1;
                    report.chunks_created += count;
                }
                Err(e) => {
                    error!(source_id = %summary.id, error = %e, "failed to index source");
                    report.failures.push(IndexingFailure {
                        source_id: summary.id,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            indexed = report.sources_indexed,
            skipped = report.sources_skipped,
            failed = report.failures.len(),
            chunks = report.chunks_created,
            "corpus sweep finished"
        );
        Ok(report)
    }

    async fn fail_document(
        &self,
        source_id: &str,
        ordinal: usize,
        cause: EmbedError,
    ) -> Result<usize> {
        let failure = KbError::provider_failure(source_id, ordinal, cause);
        self.index
            .set_indexing_state(
                source_id,
                IndexingState::Failed,
                Some(ordinal),
                Some(&failure.to_string()),
            )
            .await?;
        error!(source_id, ordinal, error = %failure, "aborting document indexing");
        Err(failure)
    }

    /// The search index this indexer writes into.
    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// The embedding provider this indexer embeds with.
    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.provider)
    }
}
