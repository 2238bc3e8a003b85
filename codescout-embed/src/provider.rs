//! Embedding provider implementations

use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a result from f16 embeddings; the dimension is inferred from
    /// the first vector (0 when empty).
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

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Deterministic feature-hashing provider.
///
/// Tokens are lowercased identifier-ish runs hashed into a fixed number of
/// buckets (token bigrams included so ordering contributes), then the bucket
/// counts are L2-normalized. Identical text always produces the identical
/// vector, which is what the indexing pipeline's change detection and the
/// tests rely on. No model files, no network.
#[derive(Debug, Clone)]
pub struct HashEmbedProvider {
    dimension: usize,
}

impl Default for HashEmbedProvider {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

impl HashEmbedProvider {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "embedding dimension must be nonzero",
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f16> {
        let mut buckets = vec![0f32; self.dimension];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        for token in &tokens {
            buckets[self.bucket(token.as_bytes())] += 1.0;
        }
        for pair in tokens.windows(2) {
            let mut hasher = FnvHasher::default();
            hasher.write(pair[0].as_bytes());
            hasher.write(b"\x1f");
            hasher.write(pair[1].as_bytes());
            buckets[(hasher.finish() % self.dimension as u64) as usize] += 0.5;
        }

        let norm: f32 = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut buckets {
                *value /= norm;
            }
        }
        buckets.into_iter().map(f16::from_f32).collect()
    }

    fn bucket(&self, bytes: &[u8]) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write(bytes);
        (hasher.finish() % self.dimension as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.embed_one(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }
        tracing::debug!("Generating embeddings for {} texts", texts.len());
        let embeddings = texts.iter().map(|t| self.embed_one(t)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hash-embed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![
            vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            vec![f16::from_f32(0.4), f16::from_f32(0.5), f16::from_f32(0.6)],
        ];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashEmbedProvider::new(0).is_err());
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalized() {
        let provider = HashEmbedProvider::default();
        let a = provider.embed_text("fn parse_config(path)").await.unwrap();
        let b = provider.embed_text("fn parse_config(path)").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), provider.embedding_dimension());

        let norm: f32 = a.iter().map(|x| x.to_f32().powi(2)).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.05);
    }

    #[tokio::test]
    async fn similar_text_scores_higher_than_unrelated() {
        let provider = HashEmbedProvider::default();
        let query = provider.embed_text("open database connection").await.unwrap();
        let close = provider
            .embed_text("fn open_connection(database: &str)")
            .await
            .unwrap();
        let far = provider
            .embed_text("render the svg chart legend")
            .await
            .unwrap();

        let cos = |x: &[f16], y: &[f16]| -> f32 {
            x.iter()
                .zip(y)
                .map(|(a, b)| a.to_f32() * b.to_f32())
                .sum()
        };
        assert!(cos(&query, &close) > cos(&query, &far));
    }

    #[tokio::test]
    async fn batch_matches_single_calls() {
        let provider = HashEmbedProvider::default();
        let texts = vec!["alpha beta".to_string(), "gamma delta".to_string()];
        let batch = provider.embed_texts(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, provider.embedding_dimension());

        let single = provider.embed_text(&texts[0]).await.unwrap();
        assert_eq!(batch.embeddings[0], single);
    }

    #[tokio::test]
    async fn empty_batch_is_empty_result() {
        let provider = HashEmbedProvider::default();
        let result = provider.embed_texts(&[]).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.dimension, 0);
    }
}
