//! Configuration for embedding providers

use serde::{Deserialize, Serialize};

/// Default vector dimension for the hash provider.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

/// Which provider implementation to construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic hash-derived vectors; no model files, no network.
    /// Intended for development and tests.
    Hash { dimension: usize },
    /// Local ONNX model via fastembed (built-in AllMiniLML6V2).
    FastEmbed,
}

/// Configuration for constructing an embedding provider.
///
/// Chunks embedded under one configuration are only comparable with queries
/// embedded under a configuration of the same dimension; the knowledge-base
/// store records the dimension it was built with and rejects mismatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Provider implementation to use
    pub provider: ProviderKind,
    /// Maximum texts per model invocation
    pub batch_size: usize,
}

impl EmbedConfig {
    /// Hash provider with the given dimension.
    pub fn hash(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hash { dimension },
            batch_size: 32,
        }
    }

    /// Local fastembed ONNX model.
    pub fn fastembed() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            batch_size: 16,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self::hash(DEFAULT_HASH_DIMENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_hash_provider() {
        let config = EmbedConfig::default();
        assert_eq!(
            config.provider,
            ProviderKind::Hash {
                dimension: DEFAULT_HASH_DIMENSION
            }
        );
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EmbedConfig::hash(64).with_batch_size(8);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EmbedConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.provider, ProviderKind::Hash { dimension: 64 });
        assert_eq!(parsed.batch_size, 8);
    }
}
