//! # fieldhub-embed
//!
//! Embedding generation for the fieldhub knowledge base.
//!
//! The crate owns the [`EmbeddingProvider`] capability: one operation
//! (text in, fixed-dimension vector out) plus a declared `dimension`. The
//! indexer and retriever are written against the trait, so the deterministic
//! hash provider used in development and the local ONNX model used in
//! production are interchangeable without touching either of them.
//!
//! ## Providers
//!
//! - [`HashEmbeddingProvider`]: derives vectors from token hashes. Fully
//!   deterministic, no model files, instant startup. The default for tests
//!   and local development.
//! - [`FastEmbedProvider`]: the built-in `AllMiniLML6V2` ONNX model via
//!   fastembed, run on the blocking pool.
//!
//! Vectors are `half::f16` end to end to keep stored embeddings compact;
//! similarity math widens to `f32`.
//!
//! ## Quick Start
//!
//! ```
//! use fieldhub_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> fieldhub_embed::Result<()> {
//! let provider = create_provider(&EmbedConfig::hash(384)).await?;
//! let embedding = provider.embed_text("bleed air from the fuel line").await?;
//! assert_eq!(embedding.len(), provider.dimension());
//! # Ok(())
//! # }
//! ```
//!
//! A provider's dimension is part of the stored index's identity: vectors of
//! different dimensions are never comparable, and the knowledge-base store
//! fails fast instead of truncating or padding.

pub mod config;
pub mod error;
pub mod provider;

pub use config::{DEFAULT_HASH_DIMENSION, EmbedConfig, ProviderKind};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingBatch, EmbeddingProvider, FastEmbedProvider, HashEmbeddingProvider, create_provider,
};
