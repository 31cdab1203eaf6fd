//! Query embedding through the semantic query cache.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::EmbeddingProvider;
use crate::cache::{query_key, CachedQuery, SemanticQueryCache};

/// Outcome of [`CachedEmbedder::embed_query`].
#[derive(Debug, Clone)]
pub struct QueryEmbedding {
    /// Query cache key of the question.
    pub key: String,
    pub vector: Vec<f64>,
    /// The cache entry when the embedding came from the cache.
    pub cached: Option<CachedQuery>,
}

impl QueryEmbedding {
    pub fn from_cache(&self) -> bool {
        self.cached.is_some()
    }
}

/// Wraps a provider so that a query already seen within the TTL never
/// reaches it. With no cache attached every call goes to the provider.
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<SemanticQueryCache>>,
    ttl: Option<Duration>,
}

impl CachedEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Option<Arc<SemanticQueryCache>>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    /// The wrapped provider, for embedding document chunks.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn cache(&self) -> Option<&Arc<SemanticQueryCache>> {
        self.cache.as_ref()
    }

    pub async fn embed_query(&self, query: &str) -> Result<QueryEmbedding> {
        let key = query_key(query);

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&key) {
                tracing::debug!(key = %key, "query cache hit");
                return Ok(QueryEmbedding {
                    key,
                    vector: entry.embedding.clone(),
                    cached: Some(entry),
                });
            }
            tracing::debug!(key = %key, "query cache miss");
        }

        let vector = self.provider.generate_embedding(query).await?;
        if let Some(cache) = &self.cache {
            cache.set(&key, CachedQuery::new(query, vector.clone()), self.ttl);
        }
        Ok(QueryEmbedding {
            key,
            vector,
            cached: None,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn model_name(&self) -> &str {
        self.provider.model_name()
    }
    fn dims(&self) -> usize {
        self.provider.dims()
    }
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f64>> {
        Ok(self.embed_query(text).await?.vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn generate_embedding(&self, text: &str) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f64, 1.0])
        }
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(SemanticQueryCache::new(Duration::from_secs(60)));
        let embedder = CachedEmbedder::new(provider.clone(), Some(cache), None);

        let first = embedder.embed_query("What is WiFi 6?").await.unwrap();
        let second = embedder.embed_query("  what is wifi 6? ").await.unwrap();

        assert!(!first.from_cache());
        assert!(second.from_cache());
        assert_eq!(first.key, second.key);
        assert_eq!(first.vector, second.vector);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_without_cache_always_calls_provider() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let embedder = CachedEmbedder::new(provider.clone(), None, None);
        embedder.generate_embedding("q").await.unwrap();
        embedder.generate_embedding("q").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(embedder.model_name(), "counting");
    }
}
