//! Question-to-chunks orchestration.
//!
//! [`RetrievalOrchestrator`] owns every retrieval component and wires them
//! the same way for each question:
//!
//! 1. classify the intent and extract key terms;
//! 2. embed the question through the query cache, reusing the recorded
//!    results of an identical or near-duplicate question about the same
//!    file;
//! 3. pick a search strategy from the intent;
//! 4. rerank for the intent and cut to the context-window budget;
//! 5. record the results on the question's cache entry.
//!
//! Components are built once and shared; background sweeps are stopped
//! with [`RetrievalOrchestrator::shutdown`].

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::adaptive::AdaptiveRetriever;
use crate::cache::{CacheStats, ChunkEmbeddingCache, SemanticQueryCache};
use crate::config::{Config, RetrievalConfig};
use crate::embedding::{create_provider, CachedEmbedder, EmbeddingProvider, QueryEmbedding};
use crate::error::{ensure_identifier, RetrievalError, RetrievalResult};
use crate::fusion::rank_and_merge;
use crate::ingest::{DedupStats, DocumentIngestor};
use crate::intent::{IntentMetadata, QueryIntent, QueryIntentClassifier};
use crate::models::ChunkResult;
use crate::rerank::rerank;
use crate::router::{FileVectorRouter, RouterStats};
use crate::search::SearchService;
use crate::store::{create_store, VectorStore};
use crate::sweep::SweepHandle;
use crate::terms::{expand_query_for_comparison, KeyTermExtractor};

/// Summaries always look at least this many chunks.
const SUMMARY_MIN_TOP_K: usize = 10;
/// Multi-vector retrieval fetches at least this many chunks per term.
const MIN_PER_TERM_TOP_K: usize = 2;
const MAX_EXPANSIONS: usize = 5;
const EXPANSION_TOP_K: usize = 3;
const CHARS_PER_TOKEN: usize = 4;

/// How the candidates of one question were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Semantic,
    Hybrid,
    MultiVector,
    Expansion,
    /// Results recorded for an identical or near-duplicate question.
    Cached,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Semantic => "semantic",
            SearchStrategy::Hybrid => "hybrid",
            SearchStrategy::MultiVector => "multi_vector",
            SearchStrategy::Expansion => "expansion",
            SearchStrategy::Cached => "cached",
        }
    }

    /// Strategy for comparison questions, from the `comparison_mode` setting.
    pub fn for_comparison(mode: &str) -> Self {
        match mode {
            "multi_vector" => SearchStrategy::MultiVector,
            "expansion" => SearchStrategy::Expansion,
            _ => SearchStrategy::Hybrid,
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ranked chunks for one question plus how they were found.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub file_id: String,
    pub question: String,
    pub intent: IntentMetadata,
    pub key_terms: Vec<String>,
    pub strategy: SearchStrategy,
    pub top_k: usize,
    /// Whether the question embedding came from the query cache.
    pub embedding_cached: bool,
    pub results: Vec<ChunkResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub query_cache: Option<CacheStats>,
    pub chunk_cache: Option<CacheStats>,
    pub router: Option<RouterStats>,
    pub dedup: DedupStats,
}

pub struct RetrievalOrchestrator {
    retrieval: RetrievalConfig,
    embedder: CachedEmbedder,
    search: Arc<SearchService>,
    ingestor: DocumentIngestor,
    classifier: QueryIntentClassifier,
    extractor: KeyTermExtractor,
    adaptive: Option<AdaptiveRetriever>,
    query_cache: Option<Arc<SemanticQueryCache>>,
    reuse_threshold: Option<f64>,
    sweeps: Vec<SweepHandle>,
}

impl RetrievalOrchestrator {
    /// Build the provider and store named in `config`, then every other
    /// component. Must be called from within a Tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        let store = create_store(&config.store)?;
        Ok(Self::new(config, provider, store))
    }

    /// Build every component around the given collaborators, honouring the
    /// feature flags in `config`. Must be called from within a Tokio
    /// runtime; the cache and router sweeps start immediately.
    pub fn new(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let mut sweeps = Vec::new();

        let query_cache = config.cache.enable_query_cache.then(|| {
            let cache = Arc::new(SemanticQueryCache::new(config.cache.query_ttl()));
            sweeps.push(cache.start_sweep(config.cache.query_sweep_interval()));
            cache
        });
        let chunk_cache = config
            .cache
            .enable_chunk_cache
            .then(|| Arc::new(ChunkEmbeddingCache::new(config.cache.chunk_cache_size)));
        let router = config.router.enable_file_routing.then(|| {
            let mut router = FileVectorRouter::new(config.router.index_ttl());
            if let Some(cache) = &chunk_cache {
                router = router.with_chunk_cache(Arc::clone(cache));
            }
            let router = Arc::new(router);
            sweeps.push(router.start_sweep(config.router.sweep_interval()));
            router
        });

        let mut search = SearchService::new(store, router, chunk_cache);
        if let Some(cache) = &query_cache {
            search = search.with_query_cache(Arc::clone(cache));
        }
        let search = Arc::new(search);
        let ingestor =
            DocumentIngestor::from_config(config, Arc::clone(&provider), Arc::clone(&search));
        let embedder = CachedEmbedder::new(provider, query_cache.clone(), None);

        tracing::info!(
            query_cache = config.cache.enable_query_cache,
            chunk_cache = config.cache.enable_chunk_cache,
            file_routing = config.router.enable_file_routing,
            adaptive = config.retrieval.enable_adaptive,
            comparison_mode = %config.retrieval.comparison_mode,
            "retrieval orchestrator ready"
        );

        Self {
            retrieval: config.retrieval.clone(),
            embedder,
            search,
            ingestor,
            classifier: QueryIntentClassifier::new(),
            extractor: KeyTermExtractor::new(),
            adaptive: config
                .retrieval
                .enable_adaptive
                .then(|| AdaptiveRetriever::from_config(&config.retrieval)),
            reuse_threshold: (config.cache.enable_query_cache && config.cache.enable_query_reuse)
                .then_some(config.cache.similar_query_threshold),
            query_cache,
            sweeps,
        }
    }

    pub fn ingestor(&self) -> &DocumentIngestor {
        &self.ingestor
    }

    pub fn search(&self) -> &Arc<SearchService> {
        &self.search
    }

    /// Ranked chunks of `file_id` for `question`.
    ///
    /// # Errors
    ///
    /// - [`RetrievalError::InvalidIdentifier`] for a blank file id.
    /// - [`RetrievalError::Upstream`] when embedding or the store fails
    ///   (for per-term strategies: when every sub-retrieval fails).
    /// - [`RetrievalError::EmptyResult`] when nothing relevant was found.
    pub async fn retrieve(&self, file_id: &str, question: &str) -> RetrievalResult<RetrievalOutcome> {
        ensure_identifier(file_id)?;
        let question = question.trim();
        if question.is_empty() {
            return Err(RetrievalError::EmptyResult {
                query: question.to_string(),
            });
        }

        let intent = self.classifier.analyze(question);
        let key_terms = self.extractor.extract_named_terms(question);
        tracing::info!(
            file_id,
            intent = %intent.intent,
            confidence = intent.confidence,
            key_terms = ?key_terms,
            "analyzed question"
        );

        let embedding = self
            .embedder
            .embed_query(question)
            .await
            .map_err(|e| RetrievalError::upstream("query embedding", &e))?;
        let embedding_cached = embedding.from_cache();

        let (strategy, top_k) = self.plan(intent.intent, key_terms.len(), intent.recommended_top_k);
        let mut outcome = RetrievalOutcome {
            file_id: file_id.to_string(),
            question: question.to_string(),
            intent,
            key_terms,
            strategy,
            top_k,
            embedding_cached,
            results: Vec::new(),
        };

        if let Some(results) = self.reusable_results(&embedding, file_id) {
            outcome.strategy = SearchStrategy::Cached;
            outcome.results = results;
            return Ok(outcome);
        }

        let candidates = match strategy {
            SearchStrategy::Hybrid => {
                self.search
                    .hybrid_search(&embedding.vector, &outcome.key_terms, file_id, top_k)
                    .await?
            }
            SearchStrategy::MultiVector => {
                self.multi_vector(&outcome.key_terms, file_id, top_k).await?
            }
            SearchStrategy::Expansion => {
                self.expansion(question, &embedding.vector, &outcome.key_terms, file_id, top_k)
                    .await?
            }
            SearchStrategy::Semantic | SearchStrategy::Cached => {
                self.semantic(&embedding.vector, file_id, top_k).await?
            }
        };

        let ranked = rerank(outcome.intent.intent, question, &outcome.key_terms, candidates);
        let results = self.fit_context_window(ranked);
        if results.is_empty() {
            tracing::info!(file_id, question, "no relevant content");
            return Err(RetrievalError::EmptyResult {
                query: question.to_string(),
            });
        }

        if let Some(cache) = &self.query_cache {
            cache.record_results(&embedding.key, file_id, &results);
        }
        tracing::info!(
            file_id,
            strategy = %strategy,
            results = results.len(),
            chunk_ids = ?results.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "retrieval complete"
        );
        outcome.results = results;
        Ok(outcome)
    }

    fn plan(&self, intent: QueryIntent, term_count: usize, recommended: usize) -> (SearchStrategy, usize) {
        match intent {
            QueryIntent::Comparison if term_count >= 2 => (
                SearchStrategy::for_comparison(&self.retrieval.comparison_mode),
                recommended,
            ),
            QueryIntent::Definition if term_count >= 1 => (SearchStrategy::Hybrid, recommended),
            QueryIntent::Summary => (SearchStrategy::Semantic, recommended.max(SUMMARY_MIN_TOP_K)),
            _ => (SearchStrategy::Semantic, recommended),
        }
    }

    /// Results recorded for this question, or for a near-duplicate one,
    /// against the same file.
    fn reusable_results(&self, embedding: &QueryEmbedding, file_id: &str) -> Option<Vec<ChunkResult>> {
        if let Some(entry) = &embedding.cached {
            if entry.has_results_for(file_id) {
                tracing::info!(file_id, "reusing results of identical question");
                return Some(entry.results.clone());
            }
            return None;
        }

        let threshold = self.reuse_threshold?;
        let cache = self.query_cache.as_ref()?;
        let (similar, key) = cache.find_similar(&embedding.vector, threshold, Some(&embedding.key))?;
        if !similar.has_results_for(file_id) {
            return None;
        }
        tracing::info!(file_id, similar_to = %similar.query, key = %key, "reusing results of near-duplicate question");
        cache.record_results(&embedding.key, file_id, &similar.results);
        Some(similar.results)
    }

    async fn semantic(&self, vector: &[f64], file_id: &str, top_k: usize) -> RetrievalResult<Vec<ChunkResult>> {
        let fetch = top_k.max(self.retrieval.max_rag_chunks);
        let candidates = self.search.query_similar(vector, file_id, fetch).await?;
        let mut results = match &self.adaptive {
            Some(adaptive) => adaptive.get_adaptive_results(candidates),
            None => candidates,
        };
        results.truncate(top_k);
        Ok(results)
    }

    /// One semantic search per key term, merged by distance.
    async fn multi_vector(
        &self,
        key_terms: &[String],
        file_id: &str,
        top_k: usize,
    ) -> RetrievalResult<Vec<ChunkResult>> {
        let per_term = (top_k / key_terms.len().max(1)).max(MIN_PER_TERM_TOP_K);
        let provider = self.embedder.provider();

        let mut sets = Vec::with_capacity(key_terms.len());
        let mut last_error = None;
        for term in key_terms {
            let vector = match provider.generate_embedding(term).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(term = %term, error = %e, "failed to embed term, skipping");
                    last_error = Some(RetrievalError::upstream("term embedding", &e));
                    continue;
                }
            };
            match self.search.query_similar(&vector, file_id, per_term).await {
                Ok(results) => sets.push(results),
                Err(e) => {
                    tracing::warn!(term = %term, error = %e, "failed to retrieve for term, skipping");
                    last_error = Some(e);
                }
            }
        }

        merge_sub_retrievals(sets, last_error, top_k, "multi-vector")
    }

    /// Semantic search for the first query variants, merged by distance.
    async fn expansion(
        &self,
        question: &str,
        question_vector: &[f64],
        key_terms: &[String],
        file_id: &str,
        top_k: usize,
    ) -> RetrievalResult<Vec<ChunkResult>> {
        let variants = expand_query_for_comparison(question, key_terms);
        let provider = self.embedder.provider();

        let mut sets = Vec::new();
        let mut last_error = None;
        for (i, variant) in variants.iter().take(MAX_EXPANSIONS).enumerate() {
            let vector = if i == 0 {
                question_vector.to_vec()
            } else {
                match provider.generate_embedding(variant).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(variant = %variant, error = %e, "failed to embed variant, skipping");
                        last_error = Some(RetrievalError::upstream("variant embedding", &e));
                        continue;
                    }
                }
            };
            match self.search.query_similar(&vector, file_id, EXPANSION_TOP_K).await {
                Ok(results) => sets.push(results),
                Err(e) => {
                    tracing::warn!(variant = %variant, error = %e, "failed to retrieve for variant, skipping");
                    last_error = Some(e);
                }
            }
        }

        merge_sub_retrievals(sets, last_error, top_k, "query expansion")
    }

    /// Longest prefix of `results` whose estimated tokens fit the context
    /// budget. The best result is always kept.
    pub fn fit_context_window(&self, results: Vec<ChunkResult>) -> Vec<ChunkResult> {
        let budget = self
            .retrieval
            .context_window_tokens
            .saturating_sub(self.retrieval.reserved_prompt_tokens);
        fit_context_window(results, budget)
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            query_cache: self.query_cache.as_ref().map(|c| c.stats()),
            chunk_cache: self.search.chunk_cache().map(|c| c.stats()),
            router: self.search.router().map(|r| r.stats()),
            dedup: self.ingestor.dedup_stats(),
        }
    }

    /// Stop every background sweep and wait for them to exit.
    pub async fn shutdown(&self) {
        for sweep in &self.sweeps {
            sweep.shutdown().await;
        }
        tracing::debug!(sweeps = self.sweeps.len(), "orchestrator shut down");
    }
}

fn merge_sub_retrievals(
    sets: Vec<Vec<ChunkResult>>,
    last_error: Option<RetrievalError>,
    top_k: usize,
    operation: &str,
) -> RetrievalResult<Vec<ChunkResult>> {
    if sets.is_empty() {
        if let Some(err) = last_error {
            tracing::warn!(operation, error = %err, "every sub-retrieval failed");
            return Err(err);
        }
        return Ok(Vec::new());
    }
    let attempted = sets.len();
    let merged = rank_and_merge(sets, top_k);
    tracing::debug!(operation, sets = attempted, merged = merged.len(), "merged sub-retrievals");
    Ok(merged)
}

/// Estimated prompt tokens of one chunk.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Longest prefix of `results` fitting in `budget` tokens; never drops the
/// first result.
pub fn fit_context_window(results: Vec<ChunkResult>, budget: usize) -> Vec<ChunkResult> {
    let mut used = 0usize;
    let mut keep = 0usize;
    for r in &results {
        let tokens = estimate_tokens(&r.text);
        if keep > 0 && used + tokens > budget {
            break;
        }
        used += tokens;
        keep += 1;
    }
    if keep < results.len() {
        tracing::debug!(kept = keep, dropped = results.len() - keep, budget, "context window cut");
    }
    let mut results = results;
    results.truncate(keep);
    results
}
