//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working in-memory setup with the offline hashing
//! embedder. Each optimisation layer (query cache, chunk cache, adaptive
//! retrieval, file routing, deduplication) has its own boolean switch so
//! it can be disabled without code changes.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

// ============ Vector Store ============

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Client-side timeout for every external store call.
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_store_url(),
            tenant: default_tenant(),
            database: default_database(),
            collection: default_collection(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_store_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_tenant() -> String {
    "default_tenant".to_string()
}
fn default_database() -> String {
    "default_database".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_store_timeout_secs() -> u64 {
    60
}

// ============ Caches ============

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enable_query_cache: bool,
    #[serde(default = "default_query_ttl_minutes")]
    pub query_ttl_minutes: u64,
    #[serde(default = "default_query_sweep_interval_secs")]
    pub query_sweep_interval_secs: u64,
    /// Reuse a previous query's results when its embedding is a near duplicate.
    #[serde(default = "default_true")]
    pub enable_query_reuse: bool,
    #[serde(default = "default_similar_query_threshold")]
    pub similar_query_threshold: f64,
    #[serde(default = "default_true")]
    pub enable_chunk_cache: bool,
    #[serde(default = "default_chunk_cache_size")]
    pub chunk_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_query_cache: true,
            query_ttl_minutes: default_query_ttl_minutes(),
            query_sweep_interval_secs: default_query_sweep_interval_secs(),
            enable_query_reuse: true,
            similar_query_threshold: default_similar_query_threshold(),
            enable_chunk_cache: true,
            chunk_cache_size: default_chunk_cache_size(),
        }
    }
}

impl CacheConfig {
    pub fn query_ttl(&self) -> Duration {
        Duration::from_secs(self.query_ttl_minutes * 60)
    }

    pub fn query_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.query_sweep_interval_secs)
    }
}

fn default_true() -> bool {
    true
}
fn default_query_ttl_minutes() -> u64 {
    60
}
fn default_query_sweep_interval_secs() -> u64 {
    300
}
fn default_similar_query_threshold() -> f64 {
    0.95
}
fn default_chunk_cache_size() -> usize {
    1000
}

// ============ File Router ============

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_true")]
    pub enable_file_routing: bool,
    #[serde(default = "default_index_ttl_hours")]
    pub index_ttl_hours: u64,
    #[serde(default = "default_router_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enable_file_routing: true,
            index_ttl_hours: default_index_ttl_hours(),
            sweep_interval_secs: default_router_sweep_interval_secs(),
        }
    }
}

impl RouterConfig {
    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_index_ttl_hours() -> u64 {
    24
}
fn default_router_sweep_interval_secs() -> u64 {
    600
}

// ============ Retrieval ============

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_true")]
    pub enable_adaptive: bool,
    #[serde(default = "default_max_rag_chunks")]
    pub max_rag_chunks: usize,
    /// Lower bound for adaptive top-k; `max_rag_chunks / 4` when unset.
    #[serde(default)]
    pub min_top_k: Option<usize>,
    #[serde(default = "default_high_similarity")]
    pub high_similarity: f64,
    #[serde(default = "default_medium_similarity")]
    pub medium_similarity: f64,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: usize,
    #[serde(default = "default_reserved_prompt_tokens")]
    pub reserved_prompt_tokens: usize,
    /// `hybrid`, `multi_vector`, or `expansion`.
    #[serde(default = "default_comparison_mode")]
    pub comparison_mode: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enable_adaptive: true,
            max_rag_chunks: default_max_rag_chunks(),
            min_top_k: None,
            high_similarity: default_high_similarity(),
            medium_similarity: default_medium_similarity(),
            min_similarity: default_min_similarity(),
            context_window_tokens: default_context_window_tokens(),
            reserved_prompt_tokens: default_reserved_prompt_tokens(),
            comparison_mode: default_comparison_mode(),
        }
    }
}

fn default_max_rag_chunks() -> usize {
    10
}
fn default_high_similarity() -> f64 {
    0.8
}
fn default_medium_similarity() -> f64 {
    0.5
}
fn default_min_similarity() -> f64 {
    0.3
}
fn default_context_window_tokens() -> usize {
    4000
}
fn default_reserved_prompt_tokens() -> usize {
    1000
}
fn default_comparison_mode() -> String {
    "hybrid".to_string()
}

// ============ Chunking ============

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_percent")]
    pub overlap_percent: f64,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    /// Hard cap per chunk in characters; `0` disables it.
    #[serde(default)]
    pub max_chunk_chars: usize,
    #[serde(default = "default_true")]
    pub preserve_paragraphs: bool,
    #[serde(default = "default_max_consecutive_newlines")]
    pub max_consecutive_newlines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_percent: default_overlap_percent(),
            chars_per_token: default_chars_per_token(),
            min_chunk_chars: default_min_chunk_chars(),
            max_chunk_chars: 0,
            preserve_paragraphs: true,
            max_consecutive_newlines: default_max_consecutive_newlines(),
        }
    }
}

fn default_target_tokens() -> usize {
    1000
}
fn default_overlap_percent() -> f64 {
    0.15
}
fn default_chars_per_token() -> usize {
    4
}
fn default_min_chunk_chars() -> usize {
    100
}
fn default_max_consecutive_newlines() -> usize {
    2
}

// ============ Ingestion ============

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_true")]
    pub enable_deduplication: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enable_deduplication: true,
        }
    }
}

/// Parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Load `path` if it exists, otherwise fall back to defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate retrieval
    let r = &config.retrieval;
    if r.max_rag_chunks == 0 {
        bail!("retrieval.max_rag_chunks must be >= 1");
    }
    if let Some(min) = r.min_top_k {
        if min > r.max_rag_chunks {
            bail!("retrieval.min_top_k must be <= retrieval.max_rag_chunks");
        }
    }
    for (name, value) in [
        ("high_similarity", r.high_similarity),
        ("medium_similarity", r.medium_similarity),
        ("min_similarity", r.min_similarity),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }
    if r.medium_similarity > r.high_similarity {
        bail!("retrieval.medium_similarity must be <= retrieval.high_similarity");
    }
    if r.reserved_prompt_tokens >= r.context_window_tokens {
        bail!("retrieval.reserved_prompt_tokens must be < retrieval.context_window_tokens");
    }
    match r.comparison_mode.as_str() {
        "hybrid" | "multi_vector" | "expansion" => {}
        other => bail!(
            "Unknown retrieval.comparison_mode: '{}'. Must be hybrid, multi_vector, or expansion.",
            other
        ),
    }

    // Validate caches
    if config.cache.chunk_cache_size == 0 {
        bail!("cache.chunk_cache_size must be >= 1");
    }
    if config.cache.query_sweep_interval_secs == 0 || config.router.sweep_interval_secs == 0 {
        bail!("sweep intervals must be > 0");
    }
    if !(0.0..=1.0).contains(&config.cache.similar_query_threshold) {
        bail!("cache.similar_query_threshold must be in [0.0, 1.0]");
    }

    // Validate chunking
    if config.chunking.target_tokens == 0 || config.chunking.chars_per_token == 0 {
        bail!("chunking.target_tokens and chunking.chars_per_token must be > 0");
    }
    if !(0.0..=0.5).contains(&config.chunking.overlap_percent) {
        bail!("chunking.overlap_percent must be in [0.0, 0.5]");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, ollama, or openai.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    match config.store.backend.as_str() {
        "memory" | "chroma" => {}
        other => bail!(
            "Unknown store backend: '{}'. Must be memory or chroma.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.embedding.provider, "hashing");
        assert_eq!(cfg.store.backend, "memory");
        assert_eq!(cfg.store.timeout_secs, 60);
        assert!(cfg.cache.enable_query_cache);
        assert!(cfg.cache.enable_chunk_cache);
        assert!(cfg.router.enable_file_routing);
        assert!(cfg.retrieval.enable_adaptive);
        assert!(cfg.ingest.enable_deduplication);
        assert_eq!(cfg.cache.chunk_cache_size, 1000);
        assert_eq!(cfg.cache.query_ttl(), Duration::from_secs(3600));
        assert_eq!(cfg.router.index_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(cfg.router.sweep_interval(), Duration::from_secs(600));
        assert_eq!(cfg.retrieval.max_rag_chunks, 10);
        assert_eq!(cfg.retrieval.context_window_tokens, 4000);
    }

    #[test]
    fn test_partial_sections() {
        let cfg = parse_config(
            r#"
[cache]
enable_query_cache = false
chunk_cache_size = 50

[retrieval]
max_rag_chunks = 12
min_top_k = 2
"#,
        )
        .unwrap();
        assert!(!cfg.cache.enable_query_cache);
        assert_eq!(cfg.cache.chunk_cache_size, 50);
        assert_eq!(cfg.cache.query_ttl_minutes, 60);
        assert_eq!(cfg.retrieval.max_rag_chunks, 12);
        assert_eq!(cfg.retrieval.min_top_k, Some(2));
        assert!((cfg.retrieval.high_similarity - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = parse_config(
            r#"
[retrieval]
high_similarity = 0.4
medium_similarity = 0.6
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("medium_similarity"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse_config("[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_remote_provider_requires_model() {
        assert!(parse_config("[embedding]\nprovider = \"ollama\"\n").is_err());
        assert!(
            parse_config("[embedding]\nprovider = \"ollama\"\nmodel = \"all-minilm\"\n").is_ok()
        );
    }

    #[test]
    fn test_rejects_unknown_comparison_mode() {
        assert!(parse_config("[retrieval]\ncomparison_mode = \"magic\"\n").is_err());
        assert!(parse_config("[retrieval]\ncomparison_mode = \"expansion\"\n").is_ok());
    }

    #[test]
    fn test_rejects_zero_cache_size() {
        assert!(parse_config("[cache]\nchunk_cache_size = 0\n").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse_config(include_str!("../config/docqa.example.toml")).unwrap();
        assert_eq!(cfg.embedding.dims, Some(256));
        assert_eq!(cfg.retrieval.comparison_mode, "hybrid");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = load_config_or_default(Path::new("/nonexistent/docqa.toml")).unwrap();
        assert_eq!(cfg.retrieval.max_rag_chunks, 10);
    }
}
