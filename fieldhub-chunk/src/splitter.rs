//! Word-window splitting of document text into overlapping segments.
//!
//! The splitter tokenizes on a configurable separator pattern (whitespace by
//! default) and yields windows of `chunk_size` words that advance by
//! `chunk_size - chunk_overlap` words each step. Windows are produced in
//! reading order and numbered densely from zero; the ordinal assigned here is
//! what later ends up as the chunk ordinal in the store.

use regex::Regex;
use serde::Serialize;

/// Default separator pattern: any run of whitespace.
pub const DEFAULT_SEPARATOR: &str = r"\s+";

/// Errors produced when constructing a [`ChunkingConfig`].
///
/// All of these are caller bugs: an invalid configuration is rejected up
/// front so it can never reach chunk-time, where a non-positive window step
/// would fail to terminate.
#[derive(Debug, thiserror::Error)]
pub enum ChunkConfigError {
    /// Chunk size of zero words can never produce a window.
    #[error("chunk size must be at least one word")]
    ZeroChunkSize,

    /// Overlap must leave a strictly positive window step.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },

    /// The separator pattern failed to compile.
    #[error("invalid separator pattern: {source}")]
    InvalidSeparator {
        #[from]
        source: regex::Error,
    },
}

/// Validated chunking parameters, in words.
///
/// Construction fails for `chunk_size == 0` or `chunk_overlap >= chunk_size`,
/// so a held config always has a strictly positive window step. The separator
/// is an explicit part of the config rather than module state, so multiple
/// configurations can coexist (e.g. while migrating between chunking
/// strategies).
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: Regex,
}

impl ChunkingConfig {
    /// Create a config with the given chunk size and overlap (both in words)
    /// and the default whitespace separator.
    ///
    /// # Errors
    /// Returns [`ChunkConfigError::ZeroChunkSize`] when `chunk_size == 0` and
    /// [`ChunkConfigError::OverlapTooLarge`] when `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkConfigError> {
        if chunk_size == 0 {
            return Err(ChunkConfigError::ZeroChunkSize);
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkConfigError::OverlapTooLarge {
                size: chunk_size,
                overlap: chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separator: Regex::new(DEFAULT_SEPARATOR)?,
        })
    }

    /// Replace the separator with a custom pattern.
    pub fn with_separator(mut self, pattern: &str) -> Result<Self, ChunkConfigError> {
        self.separator = Regex::new(pattern)?;
        Ok(self)
    }

    /// Window size in words.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Overlap between consecutive windows, in words.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Words the window advances per step. Strictly positive by construction.
    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Default for ChunkingConfig {
    /// 200-word windows with a 40-word overlap, whitespace separated.
    fn default() -> Self {
        Self::new(200, 40).expect("default chunking parameters are valid")
    }
}

/// One window of a source document's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextSegment {
    /// Position of this segment within the document (0-based, dense,
    /// reading order).
    pub sequence: usize,
    /// The segment text: its words joined by single spaces.
    pub text: String,
    /// Number of words in the segment.
    pub word_count: usize,
}

/// Splits text into overlapping word windows according to a [`ChunkingConfig`].
#[derive(Debug, Clone)]
pub struct WordChunker {
    config: ChunkingConfig,
}

impl WordChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `text` into segments.
    ///
    /// The returned iterator is lazy and finite. It borrows `text`, retains
    /// no state between calls, and calling `segments` again with the same
    /// input yields the same sequence.
    ///
    /// Whitespace-only input yields no segments; input shorter than the
    /// chunk size yields exactly one segment containing the whole text.
    pub fn segments<'a>(&self, text: &'a str) -> Segments<'a> {
        let tokens: Vec<&'a str> = self
            .config
            .separator
            .split(text)
            .filter(|token| !token.is_empty())
            .collect();

        Segments {
            tokens,
            chunk_size: self.config.chunk_size,
            step: self.config.step(),
            next_start: 0,
            sequence: 0,
            done: false,
        }
    }
}

/// Lazy iterator over the word windows of one text.
///
/// Produced by [`WordChunker::segments`]. Iteration stops after the window
/// that reaches the final word: a window fully contained in the previous
/// one's tail would repeat text that is already covered.
#[derive(Debug)]
pub struct Segments<'a> {
    tokens: Vec<&'a str>,
    chunk_size: usize,
    step: usize,
    next_start: usize,
    sequence: usize,
    done: bool,
}

impl Iterator for Segments<'_> {
    type Item = TextSegment;

    fn next(&mut self) -> Option<TextSegment> {
        if self.done || self.next_start >= self.tokens.len() {
            return None;
        }

        let end = (self.next_start + self.chunk_size).min(self.tokens.len());
        let words = &self.tokens[self.next_start..end];
        let segment = TextSegment {
            sequence: self.sequence,
            text: words.join(" "),
            word_count: words.len(),
        };

        if end == self.tokens.len() {
            self.done = true;
        } else {
            self.next_start += self.step;
        }
        self.sequence += 1;

        Some(segment)
    }
}
