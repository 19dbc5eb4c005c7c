//! Embedding provider implementations

use crate::config::{EmbedConfig, ProviderKind};
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Result of batch embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingBatch {
    /// Create a batch result; the dimension is inferred from the first
    /// vector and defaults to 0 for an empty batch.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Capability of turning text into fixed-dimension vectors.
///
/// Implementations must keep `dimension()` stable for their lifetime and
/// should be deterministic enough that re-embedding unchanged text yields a
/// vector usable for the same similarity comparisons. Batch order is
/// significant: `embed_texts` returns vectors in input order, which is what
/// lets callers assign chunk ordinals before embedding happens.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Dimension of the vectors produced by this provider
    fn dimension(&self) -> usize;

    /// Name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Construct the provider described by `config`.
///
/// The hash provider is ready immediately; the fastembed provider loads its
/// model (downloading it on first use) before returning.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match &config.provider {
        ProviderKind::Hash { dimension } => {
            Ok(Arc::new(HashEmbeddingProvider::new(*dimension)?))
        }
        ProviderKind::FastEmbed => {
            let provider = FastEmbedProvider::create(config.batch_size).await?;
            Ok(Arc::new(provider))
        }
    }
}

/// Deterministic embedding provider that derives vectors from token hashes.
///
/// Each whitespace token is hashed with FNV-1a; the hash seeds an xorshift
/// stream whose values are accumulated into the vector, and the sum is
/// L2-normalized. Identical text always produces identical vectors, and
/// texts sharing words land measurably closer than unrelated ones, which is
/// enough signal to exercise threshold and ranking behavior in tests.
/// Semantic quality is explicitly not a goal.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hash provider dimension must be positive",
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_sync(&self, text: &str) -> Vec<f16> {
        let mut accum = vec![0f32; self.dimension];

        for token in text.split_whitespace() {
            let mut hasher = FnvHasher::default();
            hasher.write(token.to_lowercase().as_bytes());
            // xorshift64* seeded by the token hash; zero would be a fixed point
            let mut state = hasher.finish().max(1);

            for slot in accum.iter_mut() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let unit = (state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f32
                    / (1u64 << 53) as f32;
                *slot += unit * 2.0 - 1.0;
            }
        }

        let norm: f32 = accum.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut accum {
                *value /= norm;
            }
        }

        accum.into_iter().map(f16::from_f32).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let embeddings = texts.iter().map(|t| self.embed_sync(t)).collect();
        Ok(EmbeddingBatch::new(embeddings))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

/// FastEmbed-based embedding provider using the built-in ONNX model.
#[derive(Clone)]
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
    batch_size: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Load the built-in model and probe its dimension.
    ///
    /// Model loading is CPU- and I/O-heavy, so it runs on the blocking pool.
    pub async fn create(batch_size: usize) -> Result<Self> {
        tracing::info!("loading fastembed model AllMiniLML6V2");

        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let init_options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                    .with_show_download_progress(false);

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                // Probe the dimension with a throwaway embedding
                let probe = model
                    .embed(vec!["probe".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let dimension = probe.first().map(|emb| emb.len()).unwrap_or(384);

                Ok((model, dimension))
            })
            .await??;

        tracing::info!(dimension, "fastembed model ready");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    /// Normalize and narrow model output to f16.
    fn convert_to_f16(embeddings: Vec<Vec<f32>>) -> Vec<Vec<f16>> {
        embeddings
            .into_iter()
            .map(|embedding| {
                let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
                embedding
                    .into_iter()
                    .map(|value| {
                        if norm > 0.0 {
                            f16::from_f32(value / norm)
                        } else {
                            f16::from_f32(value)
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("no embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch::new(vec![]));
        }

        tracing::debug!(count = texts.len(), "generating embeddings");

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let chunk = chunk.to_vec();
            let model = Arc::clone(&self.model);

            let batch = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model.lock().unwrap();
                guard
                    .embed(chunk, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(Self::convert_to_f16(batch));
        }

        Ok(EmbeddingBatch::new(all_embeddings))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f16], b: &[f16]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| f32::from(*x) * f32::from(*y))
            .sum()
    }

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let provider = HashEmbeddingProvider::new(64).unwrap();

        let first = provider.embed_text("flush the hydraulic line").await.unwrap();
        let second = provider.embed_text("flush the hydraulic line").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[tokio::test]
    async fn hash_provider_vectors_are_normalized() {
        let provider = HashEmbeddingProvider::new(128).unwrap();
        let embedding = provider.embed_text("torque spec for mounting bolts").await.unwrap();

        let norm: f32 = embedding
            .iter()
            .map(|x| f32::from(*x) * f32::from(*x))
            .sum::<f32>()
            .sqrt();
        assert!((norm - 1.0).abs() < 0.02, "norm was {norm}");
    }

    #[tokio::test]
    async fn shared_words_score_higher_than_unrelated_text() {
        let provider = HashEmbeddingProvider::new(256).unwrap();

        let query = provider.embed_text("replace compressor filter").await.unwrap();
        let related = provider
            .embed_text("how to replace the compressor filter safely")
            .await
            .unwrap();
        let unrelated = provider
            .embed_text("quarterly payroll submission deadline")
            .await
            .unwrap();

        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn batch_matches_single_embeddings() {
        let provider = HashEmbeddingProvider::new(32).unwrap();
        let texts = vec!["check valves".to_string(), "bleed the system".to_string()];

        let batch = provider.embed_texts(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, 32);

        for (text, expected) in texts.iter().zip(&batch.embeddings) {
            let single = provider.embed_text(text).await.unwrap();
            assert_eq!(&single, expected);
        }
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let provider = HashEmbeddingProvider::new(16).unwrap();
        let embedding = provider.embed_text("").await.unwrap();

        assert_eq!(embedding.len(), 16);
        assert!(embedding.iter().all(|x| f32::from(*x) == 0.0));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(matches!(
            HashEmbeddingProvider::new(0),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn factory_builds_hash_provider() {
        let provider = create_provider(&EmbedConfig::hash(48)).await.unwrap();
        assert_eq!(provider.dimension(), 48);
        assert_eq!(provider.provider_name(), "hash");
    }

    #[tokio::test]
    #[ignore] // Downloads the real model; run with: cargo test fastembed -- --ignored
    async fn fastembed_provider_embeds_text() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();

        let provider = FastEmbedProvider::create(16).await?;
        assert_eq!(provider.provider_name(), "fastembed");

        let embedding = provider
            .embed_text("preventive maintenance schedule for rooftop units")
            .await?;
        assert_eq!(embedding.len(), provider.dimension());
        assert!(embedding.iter().any(|x| f32::from(*x) != 0.0));

        Ok(())
    }
}
