//! Core SQLite operations for knowledge sources and their chunks.
//!
//! This is the data layer of the knowledge base: it owns the schema and the
//! row-level operations, and knows nothing about chunking, embedding
//! providers, or similarity math (see
//! [`SearchIndex`](super::search_index::SearchIndex) for those).
//!
//! ## Schema
//!
//! ```sql
//! -- Knowledge sources: manuals, procedures, policies
//! CREATE TABLE sources (
//!     id TEXT PRIMARY KEY,             -- opaque identifier from the CMS
//!     title TEXT,
//!     content TEXT,                    -- full document text
//!     source_type TEXT,                -- manual | procedure | policy
//!     category TEXT,                   -- topical category
//!     sensitivity TEXT,                -- public | internal
//!     active INTEGER,                  -- 0 excludes chunks from search
//!     updated_at TIMESTAMP
//! );
//!
//! -- Chunks: one embedded window of a source's text
//! CREATE TABLE chunks (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     source_id TEXT REFERENCES sources(id),
//!     ordinal INTEGER,                 -- 0-based reading order, dense
//!     content TEXT,
//!     word_count INTEGER,
//!     embedding BLOB,                  -- f16 vector
//!     title TEXT,                     -- denormalized snapshot at index time
//!     source_type TEXT,
//!     category TEXT,
//!     created_at TIMESTAMP,
//!     UNIQUE(source_id, ordinal)
//! );
//!
//! -- Per-source indexing state machine
//! CREATE TABLE indexing_status (
//!     source_id TEXT PRIMARY KEY REFERENCES sources(id),
//!     state TEXT,                      -- indexing | indexed | failed
//!     failed_ordinal INTEGER,
//!     error TEXT,
//!     updated_at TIMESTAMP
//! );
//! ```
//!
//! Chunk rows are immutable: they are inserted by the indexer and only ever
//! removed wholesale by `delete_chunks_for_source`. The `UNIQUE(source_id,
//! ordinal)` constraint turns any attempt to double-index a source into a
//! store error instead of silently corrupting ordinal density.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

/// Category of a knowledge source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    Procedure,
    Policy,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Manual => "manual",
            SourceType::Procedure => "procedure",
            SourceType::Policy => "policy",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SourceType::Manual),
            "procedure" => Ok(SourceType::Procedure),
            "policy" => Ok(SourceType::Policy),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// Access-control tag on a source. Ordered: `Public < Internal`, so a
/// retrieval ceiling of `Public` excludes everything above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Public,
    Internal,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Public => "public",
            Sensitivity::Internal => "internal",
        }
    }
}

impl FromStr for Sensitivity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(Sensitivity::Public),
            "internal" => Ok(Sensitivity::Internal),
            other => Err(format!("unknown sensitivity: {other}")),
        }
    }
}

/// Per-source indexing state. `NotIndexed` is implicit (no status row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    NotIndexed,
    Indexing,
    Indexed,
    Failed,
}

impl IndexingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexingState::NotIndexed => "not_indexed",
            IndexingState::Indexing => "indexing",
            IndexingState::Indexed => "indexed",
            IndexingState::Failed => "failed",
        }
    }
}

impl FromStr for IndexingState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_indexed" => Ok(IndexingState::NotIndexed),
            "indexing" => Ok(IndexingState::Indexing),
            "indexed" => Ok(IndexingState::Indexed),
            "failed" => Ok(IndexingState::Failed),
            other => Err(format!("unknown indexing state: {other}")),
        }
    }
}

/// A document to be made searchable. Created and edited by the content
/// management flow; the indexing core only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source_type: SourceType,
    pub category: String,
    pub sensitivity: Sensitivity,
    pub active: bool,
}

/// Identifier and title of an active source, as returned by listings.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub id: String,
    pub title: String,
}

/// One indexed unit of a source's text.
///
/// The title/type/category fields are a snapshot taken at indexing time.
/// `sensitivity` and `active` are deliberately *not* denormalized here:
/// search reads them live from the owning source row so that deactivating
/// or reclassifying a source takes effect without touching its chunks.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: Option<i64>,
    pub source_id: String,
    /// 0-based position in the source's reading order; dense per source.
    pub ordinal: usize,
    pub text: String,
    pub word_count: usize,
    pub embedding: Vec<half::f16>,
    pub title: String,
    pub source_type: SourceType,
    pub category: String,
}

/// Detailed indexing status row for one source.
#[derive(Debug, Clone)]
pub struct IndexingStatus {
    pub state: IndexingState,
    pub failed_ordinal: Option<usize>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Read capability over the source corpus.
///
/// The indexer consumes this trait rather than the concrete store so the
/// source corpus can live elsewhere than the chunk database.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn get_source(&self, id: &str) -> Result<Option<KnowledgeSource>>;
    async fn list_active_sources(&self) -> Result<Vec<SourceSummary>>;
}

/// SQLite-backed store for sources, chunks, and indexing status.
#[derive(Clone, Debug)]
pub struct SourceIndex {
    pool: SqlitePool,
}

impl SourceIndex {
    /// Open (creating if needed) the knowledge-base database under `base`.
    pub async fn open(base: &Path) -> Result<Self> {
        let db_path = base.join(".fieldhub-kb.db");

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// In-memory database for tests.
    pub async fn open_memory() -> Result<Self> {
        // A single connection: every pooled connection would otherwise get
        // its own private :memory: database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                source_type TEXT NOT NULL,
                category TEXT NOT NULL,
                sensitivity TEXT NOT NULL DEFAULT 'public',
                active INTEGER NOT NULL DEFAULT 1,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                content TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                title TEXT NOT NULL,
                source_type TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                CONSTRAINT unique_chunk UNIQUE(source_id, ordinal),
                FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS indexing_status (
                source_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                failed_ordinal INTEGER,
                error TEXT,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_active ON sources(active)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a source row. This is the seam the (out-of-scope)
    /// content-management flow writes through; the indexing core never calls
    /// it outside of operator tooling and tests.
    pub async fn upsert_source(&self, source: &KnowledgeSource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, title, content, source_type, category, sensitivity, active, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                source_type = excluded.source_type,
                category = excluded.category,
                sensitivity = excluded.sensitivity,
                active = excluded.active,
                updated_at = datetime('now')
            "#,
        )
        .bind(&source.id)
        .bind(&source.title)
        .bind(&source.content)
        .bind(source.source_type.as_str())
        .bind(&source.category)
        .bind(source.sensitivity.as_str())
        .bind(source.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert new chunks for a source inside one transaction.
    ///
    /// Plain inserts, no upsert: a duplicate `(source_id, ordinal)` means the
    /// caller is double-indexing and surfaces as a store error rather than
    /// overwriting a chunk in place.
    pub async fn insert_chunks(&self, chunks: &[StoredChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            let embedding_bytes = bytemuck::cast_slice::<half::f16, u8>(&chunk.embedding);

            sqlx::query(
                r#"
                INSERT INTO chunks (source_id, ordinal, content, word_count, embedding, title, source_type, category)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&chunk.source_id)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.text)
            .bind(chunk.word_count as i64)
            .bind(embedding_bytes)
            .bind(&chunk.title)
            .bind(chunk.source_type.as_str())
            .bind(&chunk.category)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All chunks of one source, in ordinal (reading) order.
    pub async fn get_chunks_for_source(&self, source_id: &str) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, source_id, ordinal, content, word_count, embedding, title, source_type, category
             FROM chunks WHERE source_id = ?1 ORDER BY ordinal",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(chunk_from_row).collect()
    }

    /// Delete all chunks of one source, returning how many were removed.
    /// Scoped strictly by source id; other sources' chunks are untouched.
    pub async fn delete_chunks_for_source(&self, source_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_id = ?1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Number of chunks stored for a source.
    pub async fn chunk_count_for_source(&self, source_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE source_id = ?1")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// Current indexing state for a source; absent row means `NotIndexed`.
    pub async fn indexing_state(&self, source_id: &str) -> Result<IndexingState> {
        Ok(self
            .indexing_status(source_id)
            .await?
            .map(|status| status.state)
            .unwrap_or(IndexingState::NotIndexed))
    }

    /// Full status row for a source, if one has been recorded.
    pub async fn indexing_status(&self, source_id: &str) -> Result<Option<IndexingStatus>> {
        let row = sqlx::query(
            "SELECT state, failed_ordinal, error, updated_at FROM indexing_status WHERE source_id = ?1",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let state: String = row.get("state");
            let state = IndexingState::from_str(&state)
                .map_err(|message| decode_err("state", message))?;
            let failed_ordinal: Option<i64> = row.get("failed_ordinal");

            Ok(IndexingStatus {
                state,
                failed_ordinal: failed_ordinal.map(|o| o as usize),
                error: row.get("error"),
                updated_at: row.get("updated_at"),
            })
        })
        .transpose()
    }

    /// Record a source's indexing state, replacing any previous row.
    pub async fn set_indexing_state(
        &self,
        source_id: &str,
        state: IndexingState,
        failed_ordinal: Option<usize>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexing_status (source_id, state, failed_ordinal, error, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(source_id) DO UPDATE SET
                state = excluded.state,
                failed_ordinal = excluded.failed_ordinal,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_id)
        .bind(state.as_str())
        .bind(failed_ordinal.map(|o| o as i64))
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The underlying SQLite connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SourceRepository for SourceIndex {
    async fn get_source(&self, id: &str) -> Result<Option<KnowledgeSource>> {
        let row = sqlx::query(
            "SELECT id, title, content, source_type, category, sensitivity, active
             FROM sources WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(source_from_row).transpose()
    }

    async fn list_active_sources(&self) -> Result<Vec<SourceSummary>> {
        let rows = sqlx::query("SELECT id, title FROM sources WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| SourceSummary {
                id: row.get("id"),
                title: row.get("title"),
            })
            .collect())
    }
}

fn decode_err(column: &str, message: String) -> crate::error::KbError {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
    .into()
}

fn source_from_row(row: sqlx::sqlite::SqliteRow) -> Result<KnowledgeSource> {
    let source_type: String = row.get("source_type");
    let sensitivity: String = row.get("sensitivity");

    Ok(KnowledgeSource {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        source_type: SourceType::from_str(&source_type)
            .map_err(|message| decode_err("source_type", message))?,
        category: row.get("category"),
        sensitivity: Sensitivity::from_str(&sensitivity)
            .map_err(|message| decode_err("sensitivity", message))?,
        active: row.get("active"),
    })
}

pub(crate) fn chunk_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StoredChunk> {
    let embedding_bytes: Vec<u8> = row.get("embedding");
    let embedding = bytemuck::cast_slice::<u8, half::f16>(&embedding_bytes).to_vec();
    let ordinal: i64 = row.get("ordinal");
    let word_count: i64 = row.get("word_count");
    let source_type: String = row.get("source_type");

    Ok(StoredChunk {
        id: Some(row.get("id")),
        source_id: row.get("source_id"),
        ordinal: ordinal as usize,
        text: row.get("content"),
        word_count: word_count as usize,
        embedding,
        title: row.get("title"),
        source_type: SourceType::from_str(&source_type)
            .map_err(|message| decode_err("source_type", message))?,
        category: row.get("category"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    fn source(id: &str) -> KnowledgeSource {
        KnowledgeSource {
            id: id.to_string(),
            title: format!("Source {id}"),
            content: "inspect the unit before every visit".to_string(),
            source_type: SourceType::Procedure,
            category: "maintenance".to_string(),
            sensitivity: Sensitivity::Public,
            active: true,
        }
    }

    fn chunk(source_id: &str, ordinal: usize) -> StoredChunk {
        StoredChunk {
            id: None,
            source_id: source_id.to_string(),
            ordinal,
            text: format!("chunk {ordinal}"),
            word_count: 2,
            embedding: vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            title: format!("Source {source_id}"),
            source_type: SourceType::Procedure,
            category: "maintenance".to_string(),
        }
    }

    #[tokio::test]
    async fn source_round_trip() -> Result<()> {
        let index = SourceIndex::open_memory().await?;

        let mut original = source("pump-01");
        original.sensitivity = Sensitivity::Internal;
        index.upsert_source(&original).await?;

        let fetched = index.get_source("pump-01").await?.unwrap();
        assert_eq!(fetched.title, "Source pump-01");
        assert_eq!(fetched.source_type, SourceType::Procedure);
        assert_eq!(fetched.sensitivity, Sensitivity::Internal);
        assert!(fetched.active);

        assert!(index.get_source("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_active_sources_skips_inactive() -> Result<()> {
        let index = SourceIndex::open_memory().await?;

        index.upsert_source(&source("a")).await?;
        let mut inactive = source("b");
        inactive.active = false;
        index.upsert_source(&inactive).await?;

        let listed = index.list_active_sources().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn chunks_come_back_in_ordinal_order() -> Result<()> {
        let index = SourceIndex::open_memory().await?;
        index.upsert_source(&source("s1")).await?;

        // Insertion order is deliberately not ordinal order
        index
            .insert_chunks(&[chunk("s1", 2), chunk("s1", 0), chunk("s1", 1)])
            .await?;

        let chunks = index.get_chunks_for_source("s1").await?;
        let ordinals: Vec<_> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
        assert_eq!(chunks[0].embedding.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_ordinal_is_rejected() -> Result<()> {
        let index = SourceIndex::open_memory().await?;
        index.upsert_source(&source("s1")).await?;
        index.insert_chunks(&[chunk("s1", 0)]).await?;

        let result = index.insert_chunks(&[chunk("s1", 0)]).await;
        assert!(matches!(
            result,
            Err(crate::error::KbError::StoreFailure { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_scoped_to_one_source() -> Result<()> {
        let index = SourceIndex::open_memory().await?;
        index.upsert_source(&source("a")).await?;
        index.upsert_source(&source("b")).await?;
        index.insert_chunks(&[chunk("a", 0), chunk("a", 1)]).await?;
        index.insert_chunks(&[chunk("b", 0)]).await?;

        let deleted = index.delete_chunks_for_source("a").await?;
        assert_eq!(deleted, 2);
        assert_eq!(index.chunk_count_for_source("a").await?, 0);
        assert_eq!(index.chunk_count_for_source("b").await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn indexing_status_lifecycle() -> Result<()> {
        let index = SourceIndex::open_memory().await?;
        index.upsert_source(&source("s1")).await?;

        assert_eq!(
            index.indexing_state("s1").await?,
            IndexingState::NotIndexed
        );

        index
            .set_indexing_state("s1", IndexingState::Indexing, None, None)
            .await?;
        assert_eq!(index.indexing_state("s1").await?, IndexingState::Indexing);

        index
            .set_indexing_state("s1", IndexingState::Failed, Some(3), Some("provider timeout"))
            .await?;
        let status = index.indexing_status("s1").await?.unwrap();
        assert_eq!(status.state, IndexingState::Failed);
        assert_eq!(status.failed_ordinal, Some(3));
        assert_eq!(status.error.as_deref(), Some("provider timeout"));

        index
            .set_indexing_state("s1", IndexingState::Indexed, None, None)
            .await?;
        let status = index.indexing_status("s1").await?.unwrap();
        assert_eq!(status.state, IndexingState::Indexed);
        assert_eq!(status.failed_ordinal, None);
        Ok(())
    }
}
