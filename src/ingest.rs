//! Document ingestion: chunk → embed → store.
//!
//! Each document is identified by a file id and hashed with SHA-256. When
//! deduplication is enabled and the same content was already ingested under
//! another file id, the existing chunk embeddings are copied under the new
//! id and the embedding provider is not called. Otherwise the document is
//! chunked, every chunk is embedded (failures are non-fatal per chunk) and
//! the results are written through [`SearchService::add_documents`].

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use crate::chunk::{normalize_for_embedding, ChunkingPipeline};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{ensure_identifier, RetrievalError, RetrievalResult};
use crate::models::{chunk_id, ChunkEmbedding, FILE_ID};
use crate::search::SearchService;

/// Outcome of one [`DocumentIngestor::ingest`] call.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct IngestReport {
    pub file_id: String,
    pub content_hash: String,
    pub chunks: usize,
    pub embedded: usize,
    pub skipped: usize,
    /// File whose embeddings were reused, when the content was a duplicate.
    pub duplicate_of: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DedupStats {
    pub total_files: usize,
    pub deduplicated_files: usize,
    pub unique_files: usize,
}

#[derive(Debug, Default)]
struct HashRegistry {
    /// Content hash to the files holding it, in ingestion order.
    by_hash: HashMap<String, Vec<String>>,
    by_file: HashMap<String, String>,
    linked: HashSet<String>,
}

impl HashRegistry {
    fn original_for(&self, hash: &str, file_id: &str) -> Option<String> {
        self.by_hash
            .get(hash)?
            .iter()
            .find(|f| f.as_str() != file_id)
            .cloned()
    }

    fn record(&mut self, file_id: &str, hash: &str, linked: bool) {
        self.forget(file_id);
        self.by_hash
            .entry(hash.to_string())
            .or_default()
            .push(file_id.to_string());
        self.by_file.insert(file_id.to_string(), hash.to_string());
        if linked {
            self.linked.insert(file_id.to_string());
        }
    }

    fn forget(&mut self, file_id: &str) -> bool {
        self.linked.remove(file_id);
        let Some(hash) = self.by_file.remove(file_id) else {
            return false;
        };
        if let Some(files) = self.by_hash.get_mut(&hash) {
            files.retain(|f| f != file_id);
            if files.is_empty() {
                self.by_hash.remove(&hash);
            }
        }
        true
    }
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub struct DocumentIngestor {
    pipeline: ChunkingPipeline,
    provider: Arc<dyn EmbeddingProvider>,
    search: Arc<SearchService>,
    enable_deduplication: bool,
    registry: Mutex<HashRegistry>,
}

impl DocumentIngestor {
    pub fn new(
        pipeline: ChunkingPipeline,
        provider: Arc<dyn EmbeddingProvider>,
        search: Arc<SearchService>,
        enable_deduplication: bool,
    ) -> Self {
        Self {
            pipeline,
            provider,
            search,
            enable_deduplication,
            registry: Mutex::new(HashRegistry::default()),
        }
    }

    pub fn from_config(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
        search: Arc<SearchService>,
    ) -> Self {
        Self::new(
            ChunkingPipeline::from_config(&config.chunking),
            provider,
            search,
            config.ingest.enable_deduplication,
        )
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ingest `text` as the complete content of `file_id`, replacing any
    /// earlier version of that file. The earlier version stays searchable
    /// until the new one is embedded and stored.
    pub async fn ingest(&self, file_id: &str, text: &str) -> RetrievalResult<IngestReport> {
        ensure_identifier(file_id)?;
        let hash = content_hash(text);

        let (original, previously_ingested) = {
            let registry = self.registry();
            let original = self
                .enable_deduplication
                .then(|| registry.original_for(&hash, file_id))
                .flatten();
            (original, registry.by_file.contains_key(file_id))
        };

        if let Some(original) = original {
            if let Some(report) = self.link_duplicate(file_id, &original, &hash).await? {
                return Ok(report);
            }
            tracing::debug!(file_id, original = %original, "original has no chunks, ingesting normally");
        }

        let chunks = self.pipeline.chunk_document(file_id, text);
        let total = chunks.len();
        if chunks.is_empty() {
            tracing::warn!(file_id, "document produced no chunks");
            if previously_ingested {
                self.search.delete_document(file_id).await?;
            }
            self.registry().record(file_id, &hash, false);
            return Ok(IngestReport {
                file_id: file_id.to_string(),
                content_hash: hash,
                chunks: 0,
                embedded: 0,
                skipped: 0,
                duplicate_of: None,
            });
        }

        let mut embedded = Vec::with_capacity(total);
        let mut last_error = None;
        for chunk in &chunks {
            let input = normalize_for_embedding(&chunk.text);
            match self.provider.generate_embedding(&input).await {
                Ok(vector) => embedded.push(ChunkEmbedding::from_chunk(chunk, vector)),
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "failed to embed chunk, skipping");
                    last_error = Some(e);
                }
            }
        }

        if embedded.is_empty() {
            let err = last_error.unwrap_or_else(|| anyhow::anyhow!("no chunk could be embedded"));
            return Err(RetrievalError::upstream("document embedding", &err));
        }

        let stored = embedded.len();
        self.search.add_documents(file_id, embedded).await?;
        self.registry().record(file_id, &hash, false);

        tracing::info!(
            file_id,
            chunks = total,
            embedded = stored,
            skipped = total - stored,
            model = self.provider.model_name(),
            "document ingested"
        );
        Ok(IngestReport {
            file_id: file_id.to_string(),
            content_hash: hash,
            chunks: total,
            embedded: stored,
            skipped: total - stored,
            duplicate_of: None,
        })
    }

    /// Copy the embeddings of `original` under `file_id`. `None` when the
    /// original has nothing stored any more.
    async fn link_duplicate(
        &self,
        file_id: &str,
        original: &str,
        hash: &str,
    ) -> RetrievalResult<Option<IngestReport>> {
        let existing = self
            .search
            .store()
            .get_file_chunks(original)
            .await
            .map_err(|e| RetrievalError::upstream("loading duplicate chunks", &e))?;
        if existing.is_empty() {
            return Ok(None);
        }

        let copies: Vec<ChunkEmbedding> = existing
            .into_iter()
            .enumerate()
            .map(|(ordinal, mut chunk)| {
                let ordinal = chunk
                    .metadata
                    .get("chunk_index")
                    .and_then(|v| v.as_u64())
                    .map_or(ordinal, |i| i as usize);
                chunk.chunk_id = chunk_id(file_id, ordinal);
                chunk.metadata.insert(FILE_ID.into(), file_id.into());
                chunk.metadata.insert("duplicate_of".into(), original.into());
                chunk
            })
            .collect();

        let count = copies.len();
        self.search.add_documents(file_id, copies).await?;
        self.registry().record(file_id, hash, true);

        tracing::info!(file_id, original, chunks = count, "duplicate content linked to existing embeddings");
        Ok(Some(IngestReport {
            file_id: file_id.to_string(),
            content_hash: hash.to_string(),
            chunks: count,
            embedded: 0,
            skipped: 0,
            duplicate_of: Some(original.to_string()),
        }))
    }

    /// Delete `file_id` from the store, router and chunk cache.
    pub async fn remove(&self, file_id: &str) -> RetrievalResult<()> {
        self.search.delete_document(file_id).await?;
        self.registry().forget(file_id);
        Ok(())
    }

    pub fn dedup_stats(&self) -> DedupStats {
        let registry = self.registry();
        let total_files = registry.by_file.len();
        let deduplicated_files = registry.linked.len();
        DedupStats {
            total_files,
            deduplicated_files,
            unique_files: total_files - deduplicated_files,
        }
    }

    pub fn search(&self) -> &Arc<SearchService> {
        &self.search
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChunkEmbeddingCache;
    use crate::config::ChunkingConfig;
    use crate::embedding::HashingProvider;
    use crate::models::metadata_str;
    use crate::router::FileVectorRouter;
    use crate::store::{InMemoryStore, VectorStore};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        inner: HashingProvider,
        calls: AtomicUsize,
        fail_containing: Option<&'static str>,
    }

    impl CountingProvider {
        fn new(fail_containing: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                inner: HashingProvider::new(64),
                calls: AtomicUsize::new(0),
                fail_containing,
            })
        }
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            64
        }
        async fn generate_embedding(&self, text: &str) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_containing {
                if text.contains(marker) {
                    anyhow::bail!("provider rejected input");
                }
            }
            self.inner.generate_embedding(text).await
        }
    }

    const DOC: &str = "Routers forward packets between networks and keep every device online.\n\n\
                       Antennas shape the radio signal so that distant rooms still get coverage.\n\n\
                       Mesh systems add satellites that relay traffic across large houses.";

    fn setup(
        provider: Arc<CountingProvider>,
        dedup: bool,
    ) -> (DocumentIngestor, Arc<InMemoryStore>, Arc<SearchService>) {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(ChunkEmbeddingCache::new(100));
        let router = Arc::new(FileVectorRouter::new(Duration::from_secs(3600)));
        let search = Arc::new(SearchService::new(store.clone(), Some(router), Some(cache)));
        let pipeline = ChunkingPipeline::from_config(&ChunkingConfig {
            target_tokens: 20,
            overlap_percent: 0.0,
            min_chunk_chars: 10,
            ..ChunkingConfig::default()
        });
        (
            DocumentIngestor::new(pipeline, provider, search.clone(), dedup),
            store,
            search,
        )
    }

    #[tokio::test]
    async fn test_ingest_stores_every_layer() {
        let provider = CountingProvider::new(None);
        let (ingestor, store, search) = setup(provider.clone(), true);

        let report = ingestor.ingest("a", DOC).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.embedded, 3);
        assert_eq!(report.duplicate_of, None);
        assert_eq!(report.content_hash, content_hash(DOC));
        assert_eq!(provider.calls(), 3);

        assert_eq!(store.chunk_count("a"), 3);
        assert!(search.router().unwrap().has_index("a"));
        assert!(search.chunk_cache().unwrap().contains("a_0"));
    }

    #[tokio::test]
    async fn test_duplicate_content_reuses_embeddings() {
        let provider = CountingProvider::new(None);
        let (ingestor, store, _) = setup(provider.clone(), true);

        ingestor.ingest("a", DOC).await.unwrap();
        let report = ingestor.ingest("b", DOC).await.unwrap();

        assert_eq!(report.duplicate_of.as_deref(), Some("a"));
        assert_eq!(report.embedded, 0);
        assert_eq!(provider.calls(), 3);

        let copies = store.get_file_chunks("b").await.unwrap();
        assert_eq!(copies.len(), 3);
        assert_eq!(copies[0].chunk_id, "b_0");
        assert_eq!(metadata_str(&copies[0].metadata, FILE_ID), Some("b"));

        let stats = ingestor.dedup_stats();
        assert_eq!(
            stats,
            DedupStats {
                total_files: 2,
                deduplicated_files: 1,
                unique_files: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_deduplication_can_be_disabled() {
        let provider = CountingProvider::new(None);
        let (ingestor, _, _) = setup(provider.clone(), false);

        ingestor.ingest("a", DOC).await.unwrap();
        let report = ingestor.ingest("b", DOC).await.unwrap();
        assert_eq!(report.duplicate_of, None);
        assert_eq!(provider.calls(), 6);
        assert_eq!(ingestor.dedup_stats().deduplicated_files, 0);
    }

    #[tokio::test]
    async fn test_chunk_failures_are_skipped() {
        let provider = CountingProvider::new(Some("Antennas"));
        let (ingestor, store, _) = setup(provider, true);

        let report = ingestor.ingest("a", DOC).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.embedded, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(store.chunk_count("a"), 2);
    }

    #[tokio::test]
    async fn test_all_failures_is_upstream_error() {
        let provider = CountingProvider::new(Some(" "));
        let (ingestor, store, _) = setup(provider, true);

        let err = ingestor.ingest("a", DOC).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Upstream { .. }));
        assert_eq!(store.chunk_count("a"), 0);
        assert_eq!(ingestor.dedup_stats().total_files, 0);
    }

    #[tokio::test]
    async fn test_remove_clears_file() {
        let provider = CountingProvider::new(None);
        let (ingestor, store, search) = setup(provider, true);

        ingestor.ingest("a", DOC).await.unwrap();
        ingestor.remove("a").await.unwrap();

        assert_eq!(store.chunk_count("a"), 0);
        assert!(!search.router().unwrap().has_index("a"));
        assert!(!search.chunk_cache().unwrap().contains("a_0"));
        assert_eq!(ingestor.dedup_stats().total_files, 0);
    }

    #[tokio::test]
    async fn test_reingest_replaces_previous_version() {
        let provider = CountingProvider::new(None);
        let (ingestor, store, _) = setup(provider, true);

        ingestor.ingest("a", DOC).await.unwrap();
        let report = ingestor
            .ingest("a", "A single short paragraph about routers and nothing else.")
            .await
            .unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(store.chunk_count("a"), 1);
        assert_eq!(ingestor.dedup_stats().total_files, 1);
    }

    #[tokio::test]
    async fn test_failed_reingest_keeps_previous_version() {
        let provider = CountingProvider::new(Some("outage"));
        let (ingestor, store, search) = setup(provider, true);

        ingestor.ingest("a", DOC).await.unwrap();
        let before = ingestor.dedup_stats();

        let err = ingestor
            .ingest("a", "Every paragraph of this revision hits an outage.")
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Upstream { .. }));

        assert_eq!(store.chunk_count("a"), 3);
        assert_eq!(search.router().unwrap().get_index("a").unwrap().chunks.len(), 3);
        assert!(search.chunk_cache().unwrap().contains("a_2"));
        assert_eq!(ingestor.dedup_stats(), before);

        // The old content still deduplicates against new files.
        let report = ingestor.ingest("b", DOC).await.unwrap();
        assert_eq!(report.duplicate_of.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_blank_reingest_clears_previous_version() {
        let provider = CountingProvider::new(None);
        let (ingestor, store, search) = setup(provider, true);

        ingestor.ingest("a", DOC).await.unwrap();
        let report = ingestor.ingest("a", "\n\n").await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(store.chunk_count("a"), 0);
        assert!(!search.router().unwrap().has_index("a"));
    }

    #[tokio::test]
    async fn test_blank_document_yields_empty_report() {
        let provider = CountingProvider::new(None);
        let (ingestor, _, _) = setup(provider.clone(), true);
        let report = ingestor.ingest("a", "   \n\n").await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(provider.calls(), 0);
    }
}
