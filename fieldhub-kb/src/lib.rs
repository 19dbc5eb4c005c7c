//! fieldhub-kb: knowledge-base indexing and semantic retrieval
//!
//! The fieldhub knowledge base holds the service manuals, work procedures,
//! and company policies that field technicians search from the job site.
//! This crate turns those documents into searchable overlapping chunks and
//! answers similarity queries over them.
//!
//! ## Key Modules
//!
//! - **[`index`]**: SQLite store for sources/chunks/status, the similarity
//!   layer, and the [`Indexer`](index::Indexer) orchestrating
//!   chunk → embed → store.
//! - **[`search`]**: the [`Retriever`](search::Retriever) answering
//!   threshold/limit/filtered similarity queries.
//! - **[`error`]**: the [`KbError`](error::KbError) taxonomy shared by both.
//!
//! Chunking comes from `fieldhub-chunk`, embedding providers from
//! `fieldhub-embed`; both are injected, never hard-wired.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fieldhub_chunk::ChunkingConfig;
//! use fieldhub_embed::{EmbedConfig, create_provider};
//! use fieldhub_kb::index::{CancelToken, Indexer, IndexerConfig, SearchIndex};
//! use fieldhub_kb::search::{Retriever, SearchOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let index = SearchIndex::open(std::path::Path::new(".")).await?;
//! let provider = create_provider(&EmbedConfig::default()).await?;
//!
//! let config = IndexerConfig::new(ChunkingConfig::new(200, 40)?);
//! let indexer = Indexer::new(
//!     Arc::new(index.clone()),
//!     index.clone(),
//!     Arc::clone(&provider),
//!     config,
//! )
//! .await?;
//! indexer.index_all_pending(&CancelToken::new()).await?;
//!
//! let retriever = Retriever::new(index, provider);
//! let hits = retriever
//!     .search("how do I bleed the hydraulic line", &SearchOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod index;
pub mod search;

pub use error::{KbError, Result};
