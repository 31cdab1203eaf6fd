//! In-memory cache tiers.
//!
//! - [`ChunkEmbeddingCache`]: bounded LRU of chunk embeddings with a
//!   popularity counter that survives eviction.
//! - [`SemanticQueryCache`]: TTL cache of query embeddings (and the results
//!   they produced) keyed by a hash of the normalized query, with a
//!   near-duplicate lookup by cosine similarity.
//!
//! Both caches are best-effort: a miss just means the caller recomputes.
//! Their locks recover from poisoning rather than propagating a panic.

mod chunk_cache;
mod query_cache;

pub use chunk_cache::ChunkEmbeddingCache;
pub use query_cache::{normalize_query, query_key, CachedQuery, SemanticQueryCache};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters reported by both cache tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    /// `None` means unbounded.
    pub max_size: Option<usize>,
    pub evictions: u64,
    pub hit_rate: f64,
    /// Near-duplicate lookups that matched; kept apart from `hits`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub near_duplicate_hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cleared: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub fn compute_hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
