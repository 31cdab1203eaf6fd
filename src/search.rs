//! Semantic, keyword and hybrid retrieval for one document.
//!
//! [`SearchService`] sits in front of the external [`VectorStore`] and
//! prefers the in-memory per-file index kept by [`FileVectorRouter`]:
//!
//! | Operation | Index present | No index / routing disabled |
//! |-----------|---------------|-----------------------------|
//! | `query_similar` | parallel cosine scan | store `query_similar` |
//! | `keyword_search` | term scoring over indexed chunks | store `keyword_search` |
//! | `hybrid_search` | RRF of the two legs above | RRF of the two legs above |
//!
//! Writes (`add_documents`, `delete_document`) keep the store, the chunk
//! embedding cache, the router and the cached query results consistent.

use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::{ChunkEmbeddingCache, SemanticQueryCache};
use crate::error::{ensure_identifier, RetrievalError, RetrievalResult};
use crate::fusion;
use crate::models::{ChunkEmbedding, ChunkResult};
use crate::router::FileVectorRouter;
use crate::store::VectorStore;

pub struct SearchService {
    store: Arc<dyn VectorStore>,
    router: Option<Arc<FileVectorRouter>>,
    chunk_cache: Option<Arc<ChunkEmbeddingCache>>,
    query_cache: Option<Arc<SemanticQueryCache>>,
}

impl SearchService {
    /// `router` is `None` when file routing is disabled and `chunk_cache` is
    /// `None` when the chunk cache is disabled.
    pub fn new(
        store: Arc<dyn VectorStore>,
        router: Option<Arc<FileVectorRouter>>,
        chunk_cache: Option<Arc<ChunkEmbeddingCache>>,
    ) -> Self {
        Self {
            store,
            router,
            chunk_cache,
            query_cache: None,
        }
    }

    /// Drop cached query results of a file whenever its chunks change.
    pub fn with_query_cache(mut self, cache: Arc<SemanticQueryCache>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn router(&self) -> Option<&Arc<FileVectorRouter>> {
        self.router.as_ref()
    }

    pub fn chunk_cache(&self) -> Option<&Arc<ChunkEmbeddingCache>> {
        self.chunk_cache.as_ref()
    }

    /// Nearest chunks of `file_id` by ascending distance.
    pub async fn query_similar(
        &self,
        vector: &[f64],
        file_id: &str,
        top_k: usize,
    ) -> RetrievalResult<Vec<ChunkResult>> {
        ensure_identifier(file_id)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        if let Some(router) = &self.router {
            if let Some(results) = router.search_in_file(file_id, vector, top_k)? {
                tracing::debug!(file_id, results = results.len(), "served from file index");
                return Ok(results);
            }
        }

        tracing::debug!(file_id, store = self.store.name(), "falling back to vector store");
        self.store
            .query_similar(vector, file_id, top_k)
            .await
            .map_err(|e| RetrievalError::upstream("vector store query", &e))
    }

    /// Chunks of `file_id` matching any of `keywords`, best match first.
    pub async fn keyword_search(
        &self,
        keywords: &[String],
        file_id: &str,
        top_k: usize,
    ) -> RetrievalResult<Vec<ChunkResult>> {
        ensure_identifier(file_id)?;
        if keywords.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        if let Some(index) = self.router.as_ref().and_then(|r| r.get_index(file_id)) {
            let candidates = index
                .chunks
                .iter()
                .map(|c| (c.chunk_id.as_str(), c.text.as_str(), &c.metadata));
            return Ok(fusion::keyword_search(candidates, keywords, top_k));
        }

        self.store
            .keyword_search(keywords, file_id, top_k)
            .await
            .map_err(|e| RetrievalError::upstream("vector store keyword search", &e))
    }

    /// Semantic top `top_k` and keyword top `top_k / 2`, fused with
    /// reciprocal rank fusion. A failing keyword leg degrades to the
    /// semantic results; a failing semantic leg fails the search.
    pub async fn hybrid_search(
        &self,
        vector: &[f64],
        keywords: &[String],
        file_id: &str,
        top_k: usize,
    ) -> RetrievalResult<Vec<ChunkResult>> {
        let semantic = self.query_similar(vector, file_id, top_k).await?;
        if keywords.is_empty() {
            return Ok(semantic);
        }

        let keyword_k = (top_k / 2).max(1);
        let keyword = match self.keyword_search(keywords, file_id, keyword_k).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(file_id, error = %e, "keyword leg failed, using semantic results only");
                return Ok(semantic);
            }
        };

        let fused = fusion::reciprocal_rank_fusion(&[&semantic, &keyword], top_k);
        tracing::debug!(
            file_id,
            semantic = semantic.len(),
            keyword = keyword.len(),
            fused = fused.len(),
            "hybrid search fused"
        );
        Ok(fused)
    }

    /// Store `chunks` as the complete content of `file_id`.
    ///
    /// The new chunks are written before anything is removed, so a failed
    /// write leaves the previous content searchable. Chunks of the previous
    /// content that are not part of `chunks` are pruned afterwards.
    pub async fn add_documents(
        &self,
        file_id: &str,
        chunks: Vec<ChunkEmbedding>,
    ) -> RetrievalResult<()> {
        ensure_identifier(file_id)?;
        let previous = self.current_chunk_ids(file_id).await?;

        self.store
            .upsert(file_id, &chunks)
            .await
            .map_err(|e| RetrievalError::upstream("vector store upsert", &e))?;

        let current: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let stale: Vec<String> = previous
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();
        if !stale.is_empty() {
            self.store
                .delete_chunks(file_id, &stale)
                .await
                .map_err(|e| RetrievalError::upstream("vector store delete", &e))?;
            tracing::debug!(file_id, stale = stale.len(), "pruned chunks of previous content");
        }

        if let Some(cache) = &self.chunk_cache {
            for id in &stale {
                cache.delete(id);
            }
            cache.warm(chunks.iter().map(|c| (c.chunk_id.clone(), c.vector.clone())));
        }
        if let Some(router) = &self.router {
            router.add_or_sync_index(file_id, chunks)?;
        }
        self.invalidate_cached_results(file_id);
        Ok(())
    }

    /// Remove every trace of `file_id`.
    pub async fn delete_document(&self, file_id: &str) -> RetrievalResult<()> {
        ensure_identifier(file_id)?;

        if let Some(cache) = &self.chunk_cache {
            let chunk_ids = self.current_chunk_ids(file_id).await.unwrap_or_else(|e| {
                tracing::warn!(file_id, error = %e, "could not list chunks to evict");
                Vec::new()
            });
            for id in &chunk_ids {
                cache.delete(id);
            }
        }

        self.store
            .delete(file_id)
            .await
            .map_err(|e| RetrievalError::upstream("vector store delete", &e))?;
        if let Some(router) = &self.router {
            router.remove_index(file_id);
        }
        self.invalidate_cached_results(file_id);
        tracing::info!(file_id, "document deleted");
        Ok(())
    }

    /// Chunk ids stored for `file_id`, from the file index when one exists.
    async fn current_chunk_ids(&self, file_id: &str) -> RetrievalResult<Vec<String>> {
        if let Some(index) = self.router.as_ref().and_then(|r| r.get_index(file_id)) {
            return Ok(index.chunks.iter().map(|c| c.chunk_id.clone()).collect());
        }
        self.store
            .get_file_chunks(file_id)
            .await
            .map(|chunks| chunks.into_iter().map(|c| c.chunk_id).collect())
            .map_err(|e| RetrievalError::upstream("vector store get", &e))
    }

    fn invalidate_cached_results(&self, file_id: &str) {
        if let Some(cache) = &self.query_cache {
            cache.invalidate_file(file_id);
        }
    }

    /// Build router indexes for `file_ids` from the store. Returns how many
    /// indexes were installed.
    pub async fn warm_indexes(&self, file_ids: &[String]) -> usize {
        let Some(router) = &self.router else {
            return 0;
        };
        let store = Arc::clone(&self.store);
        router
            .warm_cache(file_ids, move |file_id| {
                let store = Arc::clone(&store);
                async move { store.get_file_chunks(&file_id).await }
            })
            .await
    }
}
