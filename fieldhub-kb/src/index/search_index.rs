//! Similarity search over stored chunks, plus embedding-model bookkeeping.
//!
//! [`SearchIndex`] wraps [`SourceIndex`] (and derefs to it) with the pieces
//! that understand vectors: a registry of the embedding models an index was
//! built with, a brute-force cosine similarity query, and corpus statistics.
//! The nearest-neighbor scan is deliberately simple; swapping in a real
//! vector index is a storage concern, not something the indexer or
//! retriever would notice.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::source_index::{
    KnowledgeSource, Sensitivity, SourceIndex, SourceSummary, SourceType, StoredChunk,
    chunk_from_row,
};
use crate::error::{KbError, Result};

/// Identity of an embedding provider as used for one index.
///
/// Any change of dimension invalidates every stored vector for comparison
/// purposes, so the registry keeps enough to detect that before queries
/// start returning nonsense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelMetadata {
    /// Provider name, e.g. "hash" or "fastembed"
    pub provider: String,
    /// Dimension of the vectors this provider produces
    pub dimension: usize,
}

impl EmbeddingModelMetadata {
    pub fn new(provider: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            dimension,
        }
    }

    /// Unique identifier for this provider/dimension pairing.
    pub fn model_id(&self) -> String {
        format!("{}:{}", self.provider, self.dimension)
    }
}

/// Counts describing the current state of the index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub sources_count: usize,
    pub indexed_sources_count: usize,
    pub chunks_count: usize,
    pub models_count: usize,
}

/// Search-capable view over the knowledge-base store.
#[derive(Clone, Debug)]
pub struct SearchIndex {
    source_index: SourceIndex,
    pool: SqlitePool,
}

impl SearchIndex {
    pub async fn open(base: &Path) -> Result<Self> {
        Self::wrap(SourceIndex::open(base).await?).await
    }

    pub async fn open_memory() -> Result<Self> {
        Self::wrap(SourceIndex::open_memory().await?).await
    }

    async fn wrap(source_index: SourceIndex) -> Result<Self> {
        let pool = source_index.pool().clone();
        let index = Self { source_index, pool };
        index.create_model_table().await?;
        Ok(index)
    }

    async fn create_model_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_models (
                model_id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The underlying source/chunk store.
    pub fn source_index(&self) -> &SourceIndex {
        &self.source_index
    }

    /// Record the embedding model an indexer is about to use.
    pub async fn register_embedding_model(&self, model: &EmbeddingModelMetadata) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_models (model_id, provider, dimension)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(model_id) DO UPDATE SET
                provider = excluded.provider,
                dimension = excluded.dimension
            "#,
        )
        .bind(model.model_id())
        .bind(&model.provider)
        .bind(model.dimension as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All embedding models ever registered against this index.
    pub async fn registered_models(&self) -> Result<Vec<EmbeddingModelMetadata>> {
        let rows = sqlx::query("SELECT provider, dimension FROM embedding_models ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| EmbeddingModelMetadata {
                provider: row.get("provider"),
                dimension: row.get::<i64, _>("dimension") as usize,
            })
            .collect())
    }

    /// Dimension of the vectors currently stored, if any chunks exist.
    ///
    /// Cheap pre-flight check for retrieval: a provider whose dimension
    /// disagrees with this can fail before embedding the query at all.
    pub async fn stored_dimension(&self) -> Result<Option<usize>> {
        let bytes = sqlx::query_scalar::<_, i64>("SELECT length(embedding) FROM chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(bytes.map(|b| b as usize / std::mem::size_of::<half::f16>()))
    }

    /// Rank stored chunks by cosine similarity against `query_embedding`.
    ///
    /// Filters applied, in order: owning source must be active (read live,
    /// so deactivation needs no chunk deletion), source sensitivity at most
    /// `max_sensitivity` (live as well), optional source-type match (against
    /// the indexing-time snapshot), then `score >= threshold`. Results come
    /// back closest first, capped at `limit`; an empty result is a normal
    /// outcome, not an error.
    ///
    /// Any stored embedding whose dimension differs from the query's aborts
    /// the whole call with [`KbError::DimensionMismatch`]: scores across
    /// mixed dimensions are meaningless and must not be returned.
    pub async fn search_similar(
        &self,
        query_embedding: &[half::f16],
        threshold: f32,
        limit: usize,
        source_type: Option<SourceType>,
        max_sensitivity: Sensitivity,
    ) -> Result<Vec<(StoredChunk, f32)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_id, c.ordinal, c.content, c.word_count, c.embedding,
                   c.title, c.source_type, c.category, s.sensitivity
            FROM chunks c
            JOIN sources s ON s.id = c.source_id
            WHERE s.active = 1 AND (?1 IS NULL OR c.source_type = ?1)
            ORDER BY c.source_id, c.ordinal
            "#,
        )
        .bind(source_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(StoredChunk, f32)> = Vec::new();
        for row in rows {
            let sensitivity: String = row.get("sensitivity");
            let sensitivity: Sensitivity = sensitivity
                .parse()
                .map_err(|message: String| KbError::StoreFailure {
                    source: sqlx::Error::ColumnDecode {
                        index: "sensitivity".to_string(),
                        source: message.into(),
                    },
                })?;
            if sensitivity > max_sensitivity {
                continue;
            }

            let chunk = chunk_from_row(row)?;
            if chunk.embedding.len() != query_embedding.len() {
                return Err(KbError::DimensionMismatch {
                    expected: chunk.embedding.len(),
                    actual: query_embedding.len(),
                });
            }

            let score = cosine_similarity(query_embedding, &chunk.embedding);
            if score >= threshold {
                scored.push((chunk, score));
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.source_id.cmp(&b.0.source_id))
                .then_with(|| a.0.ordinal.cmp(&b.0.ordinal))
        });
        scored.truncate(limit);

        tracing::debug!(
            results = scored.len(),
            threshold,
            limit,
            "similarity search complete"
        );
        Ok(scored)
    }

    /// Corpus-level counts.
    pub async fn stats(&self) -> Result<IndexStats> {
        let sources_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;
        let indexed_sources_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM indexing_status WHERE state = 'indexed'")
                .fetch_one(&self.pool)
                .await?;
        let chunks_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let models_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_models")
            .fetch_one(&self.pool)
            .await?;

        Ok(IndexStats {
            sources_count: sources_count as usize,
            indexed_sources_count: indexed_sources_count as usize,
            chunks_count: chunks_count as usize,
            models_count: models_count as usize,
        })
    }
}

#[async_trait::async_trait]
impl super::source_index::SourceRepository for SearchIndex {
    async fn get_source(&self, id: &str) -> Result<Option<KnowledgeSource>> {
        self.source_index.get_source(id).await
    }

    async fn list_active_sources(&self) -> Result<Vec<SourceSummary>> {
        self.source_index.list_active_sources().await
    }
}

// Transparent access to the underlying store's operations
impl std::ops::Deref for SearchIndex {
    type Target = SourceIndex;

    fn deref(&self) -> &Self::Target {
        &self.source_index
    }
}

/// Cosine similarity between two equal-length f16 vectors, widened to f32.
fn cosine_similarity(a: &[half::f16], b: &[half::f16]) -> f32 {
    let dot: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f32::from(*x) * f32::from(*y))
        .sum();

    let norm_a: f32 = a.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    fn vector(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    fn source(id: &str, sensitivity: Sensitivity, active: bool) -> KnowledgeSource {
        KnowledgeSource {
            id: id.to_string(),
            title: format!("Source {id}"),
            content: String::new(),
            source_type: SourceType::Manual,
            category: "hvac".to_string(),
            sensitivity,
            active,
        }
    }

    fn chunk(source_id: &str, ordinal: usize, embedding: Vec<f16>) -> StoredChunk {
        StoredChunk {
            id: None,
            source_id: source_id.to_string(),
            ordinal,
            text: format!("{source_id} chunk {ordinal}"),
            word_count: 3,
            embedding,
            title: format!("Source {source_id}"),
            source_type: SourceType::Manual,
            category: "hvac".to_string(),
        }
    }

    async fn seeded_index() -> Result<SearchIndex> {
        let index = SearchIndex::open_memory().await?;

        index
            .upsert_source(&source("pub", Sensitivity::Public, true))
            .await?;
        index
            .upsert_source(&source("int", Sensitivity::Internal, true))
            .await?;
        index
            .upsert_source(&source("off", Sensitivity::Public, false))
            .await?;

        // Angles from the x axis: 0°, ~37°, 90°
        index
            .insert_chunks(&[
                chunk("pub", 0, vector(&[1.0, 0.0])),
                chunk("pub", 1, vector(&[0.8, 0.6])),
            ])
            .await?;
        index
            .insert_chunks(&[chunk("int", 0, vector(&[1.0, 0.0]))])
            .await?;
        index
            .insert_chunks(&[chunk("off", 0, vector(&[1.0, 0.0]))])
            .await?;

        Ok(index)
    }

    #[tokio::test]
    async fn ranks_by_similarity_descending() -> Result<()> {
        let index = seeded_index().await?;
        let query = vector(&[1.0, 0.0]);

        let results = index
            .search_similar(&query, 0.0, 10, None, Sensitivity::Public)
            .await?;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.ordinal, 0);
        assert!(results[0].1 > 0.99);
        assert!((results[1].1 - 0.8).abs() < 0.01);
        Ok(())
    }

    #[tokio::test]
    async fn threshold_and_limit_apply() -> Result<()> {
        let index = seeded_index().await?;
        let query = vector(&[1.0, 0.0]);

        let strict = index
            .search_similar(&query, 0.9, 10, None, Sensitivity::Public)
            .await?;
        assert_eq!(strict.len(), 1);

        let capped = index
            .search_similar(&query, 0.0, 1, None, Sensitivity::Public)
            .await?;
        assert_eq!(capped.len(), 1);
        assert!(capped[0].1 > 0.99);
        Ok(())
    }

    #[tokio::test]
    async fn public_ceiling_hides_internal_sources() -> Result<()> {
        let index = seeded_index().await?;
        let query = vector(&[1.0, 0.0]);

        let public_only = index
            .search_similar(&query, 0.5, 10, None, Sensitivity::Public)
            .await?;
        assert!(public_only.iter().all(|(c, _)| c.source_id != "int"));

        let with_internal = index
            .search_similar(&query, 0.5, 10, None, Sensitivity::Internal)
            .await?;
        assert!(with_internal.iter().any(|(c, _)| c.source_id == "int"));
        Ok(())
    }

    #[tokio::test]
    async fn inactive_sources_are_excluded_without_deleting_chunks() -> Result<()> {
        let index = seeded_index().await?;
        let query = vector(&[1.0, 0.0]);

        let results = index
            .search_similar(&query, 0.0, 10, None, Sensitivity::Internal)
            .await?;
        assert!(results.iter().all(|(c, _)| c.source_id != "off"));
        assert_eq!(index.chunk_count_for_source("off").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn source_type_filter_applies() -> Result<()> {
        let index = seeded_index().await?;
        let query = vector(&[1.0, 0.0]);

        let manuals = index
            .search_similar(&query, 0.0, 10, Some(SourceType::Manual), Sensitivity::Public)
            .await?;
        assert_eq!(manuals.len(), 2);

        let policies = index
            .search_similar(&query, 0.0, 10, Some(SourceType::Policy), Sensitivity::Public)
            .await?;
        assert!(policies.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn mixed_dimensions_fail_fast() -> Result<()> {
        let index = seeded_index().await?;
        let query = vector(&[1.0, 0.0, 0.0]);

        let result = index
            .search_similar(&query, 0.0, 10, None, Sensitivity::Public)
            .await;
        assert!(matches!(
            result,
            Err(KbError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn model_registry_round_trip() -> Result<()> {
        let index = SearchIndex::open_memory().await?;
        let model = EmbeddingModelMetadata::new("hash", 384);

        index.register_embedding_model(&model).await?;
        index.register_embedding_model(&model).await?; // idempotent

        let models = index.registered_models().await?;
        assert_eq!(models, vec![model]);
        Ok(())
    }

    #[tokio::test]
    async fn stored_dimension_reflects_chunks() -> Result<()> {
        let index = SearchIndex::open_memory().await?;
        assert_eq!(index.stored_dimension().await?, None);

        index
            .upsert_source(&source("pub", Sensitivity::Public, true))
            .await?;
        index
            .insert_chunks(&[chunk("pub", 0, vector(&[1.0, 0.0]))])
            .await?;
        assert_eq!(index.stored_dimension().await?, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_sources_and_chunks() -> Result<()> {
        let index = seeded_index().await?;
        index
            .register_embedding_model(&EmbeddingModelMetadata::new("hash", 2))
            .await?;

        let stats = index.stats().await?;
        assert_eq!(stats.sources_count, 3);
        assert_eq!(stats.chunks_count, 4);
        assert_eq!(stats.models_count, 1);
        assert_eq!(stats.indexed_sources_count, 0);
        Ok(())
    }
}
