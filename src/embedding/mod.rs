//! Embedding provider abstraction and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`HashingProvider`]**: deterministic, offline feature-hashing embedder.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embeddings` endpoint.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//!
//! [`CachedEmbedder`] wraps any provider with the semantic query cache so
//! repeated questions never reach the provider.
//!
//! Also provides the single similarity/distance conversion point used by
//! every index and ranking step:
//! - [`cosine_similarity`]: similarity between two vectors, or a validation error
//! - [`similarity_to_distance`] / [`distance_to_similarity`]
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust
//! # use docqa_retrieval::config::EmbeddingConfig;
//! # use docqa_retrieval::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // provider = "hashing"
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "hashing");
//! ```

mod cached;
mod remote;

pub use cached::{CachedEmbedder, QueryEmbedding};
pub use remote::{OllamaProvider, OpenAIProvider};

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::error::{RetrievalError, RetrievalResult};

/// Default dimensionality of the hashing embedder.
const DEFAULT_HASHING_DIMS: usize = 256;

/// Trait for embedding providers.
///
/// Implementations must be `Send + Sync` so a single provider can serve
/// concurrent queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm:l6-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a single text.
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f64>>;
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn generate_embedding(&self, _text: &str) -> Result<Vec<f64>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Hashing Provider ============

/// Offline embedder based on the hashing trick.
///
/// Each lowercase alphanumeric token is hashed with SHA-256 into one of
/// `dims` buckets; the bucket counts are L2-normalised. Texts that share
/// vocabulary land close together, which is enough for local runs and
/// deterministic tests. Texts without any token cannot be embedded.
pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dims as u64) as usize
    }

    /// Synchronous core of [`generate_embedding`](EmbeddingProvider::generate_embedding).
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f64>> {
        let mut vector = vec![0.0f64; self.dims];
        let mut tokens = 0usize;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
            tokens += 1;
        }
        if tokens == 0 {
            bail!("Cannot embed text without alphanumeric tokens");
        }
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        for v in vector.iter_mut() {
            *v /= norm;
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f64>> {
        self.embed_sync(text)
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hashing"` | [`HashingProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
///
/// # Errors
///
/// Returns an error for unknown provider names or if a remote provider
/// cannot be initialized (missing model, API key, or HTTP client).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hashing" => Ok(Arc::new(HashingProvider::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        ))),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
///
/// # Errors
///
/// [`RetrievalError::Validation`] when the vectors differ in length, are
/// empty, or either has zero magnitude. Callers skip such candidates.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> RetrievalResult<f64> {
    if a.len() != b.len() {
        return Err(RetrievalError::validation(format!(
            "vectors must have same length: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    if a.is_empty() {
        return Err(RetrievalError::validation("vectors cannot be empty"));
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(RetrievalError::validation("vector has zero magnitude"));
    }

    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// `distance = 1 − similarity`.
pub fn similarity_to_distance(similarity: f64) -> f64 {
    1.0 - similarity
}

/// `similarity = 1 − distance`.
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 - distance
}

/// Cosine distance between two vectors; see [`cosine_similarity`].
pub fn cosine_distance(a: &[f64], b: &[f64]) -> RetrievalResult<f64> {
    cosine_similarity(a, b).map(similarity_to_distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).unwrap();
        assert!(sim.abs() < 1e-9);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((sim + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_different_lengths_is_validation_error() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, RetrievalError::Validation { .. }));
    }

    #[test]
    fn test_cosine_zero_magnitude_is_validation_error() {
        let err = cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap_err();
        assert!(matches!(err, RetrievalError::Validation { .. }));
        assert!(cosine_similarity(&[], &[]).is_err());
    }

    #[test]
    fn test_distance_similarity_duality() {
        for s in [-1.0, -0.3, 0.0, 0.42, 1.0] {
            let d = similarity_to_distance(s);
            assert!((distance_to_similarity(d) - s).abs() < 1e-12);
        }
        let d = cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_hashing_provider_is_deterministic_and_normalised() {
        let p = HashingProvider::new(64);
        let a = p.embed_sync("WiFi 6 is faster than WiFi 5").unwrap();
        let b = p.embed_sync("wifi 6 is FASTER than wifi 5").unwrap();
        assert_eq!(a, b);
        let norm: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hashing_provider_shared_vocabulary_is_closer() {
        let p = HashingProvider::new(256);
        let q = p.embed_sync("wifi standards comparison").unwrap();
        let near = p.embed_sync("comparison of wifi standards and speeds").unwrap();
        let far = p.embed_sync("banana bread recipe with walnuts").unwrap();
        let near_sim = cosine_similarity(&q, &near).unwrap();
        let far_sim = cosine_similarity(&q, &far).unwrap();
        assert!(near_sim > far_sim);
    }

    #[test]
    fn test_hashing_provider_rejects_empty_text() {
        let p = HashingProvider::new(8);
        assert!(p.embed_sync("  ?! ").is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let p = DisabledProvider;
        assert!(p.generate_embedding("hello").await.is_err());
    }

    #[test]
    fn test_create_provider_by_name() {
        let cfg = EmbeddingConfig::default();
        let p = create_provider(&cfg).unwrap();
        assert_eq!(p.model_name(), "hashing");
        assert_eq!(p.dims(), DEFAULT_HASHING_DIMS);

        let cfg = EmbeddingConfig {
            provider: "nope".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_provider(&cfg).is_err());
    }
}
