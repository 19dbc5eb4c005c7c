//! # fieldhub-chunk
//!
//! Word-window text chunking for the fieldhub knowledge base.
//!
//! Knowledge-base articles (service manuals, work procedures, company
//! policies) are split into overlapping word windows before embedding, so
//! that each window fits the embedding model comfortably while the overlap
//! preserves context across window boundaries.
//!
//! The crate exposes two types:
//! - [`ChunkingConfig`]: validated chunk size / overlap / separator settings.
//! - [`WordChunker`]: splits a text into an ordered, lazy sequence of
//!   [`TextSegment`]s according to a config.
//!
//! Chunking is a pure function of its input: no I/O, no retained state, and
//! the same text always produces the same segments.
//!
//! ## Quick Start
//!
//! ```
//! use fieldhub_chunk::{ChunkingConfig, WordChunker};
//!
//! let config = ChunkingConfig::new(5, 2)?;
//! let chunker = WordChunker::new(config);
//!
//! let segments: Vec<_> = chunker
//!     .segments("one two three four five six seven eight nine ten eleven twelve")
//!     .collect();
//!
//! assert_eq!(segments.len(), 4);
//! assert_eq!(segments[0].text, "one two three four five");
//! assert_eq!(segments[1].text, "four five six seven eight");
//! assert_eq!(segments[3].sequence, 3);
//! # Ok::<(), fieldhub_chunk::ChunkConfigError>(())
//! ```
//!
//! ## Overlap semantics
//!
//! With chunk size `S` and overlap `O`, consecutive windows advance by
//! `S - O` words, so the last `O` words of one segment reappear as the first
//! `O` words of the next. Configurations with `O >= S` would make the window
//! step non-positive and are rejected by [`ChunkingConfig::new`] before any
//! text is chunked.

pub mod splitter;

pub use splitter::{ChunkConfigError, ChunkingConfig, Segments, TextSegment, WordChunker};
