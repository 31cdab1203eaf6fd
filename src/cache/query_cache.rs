//! TTL cache of query embeddings with near-duplicate lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::CacheStats;
use crate::embedding::cosine_similarity;
use crate::models::ChunkResult;
use crate::sweep::SweepHandle;

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of the normalized query.
pub fn query_key(query: &str) -> String {
    hex::encode(Sha256::digest(normalize_query(query).as_bytes()))
}

/// A cached query: its embedding and, once retrieval ran, the results it
/// produced for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuery {
    pub query: String,
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub results: Vec<ChunkResult>,
    pub created_at: DateTime<Utc>,
}

impl CachedQuery {
    pub fn new(query: impl Into<String>, embedding: Vec<f64>) -> Self {
        Self {
            query: query.into(),
            embedding,
            file_id: None,
            results: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn chunk_ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.id.as_str()).collect()
    }

    /// Whether this entry carries results that can stand in for a search
    /// of `file_id`.
    pub fn has_results_for(&self, file_id: &str) -> bool {
        !self.results.is_empty() && self.file_id.as_deref() == Some(file_id)
    }
}

#[derive(Debug)]
struct Entry {
    value: CachedQuery,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Unbounded TTL cache keyed by [`query_key`].
///
/// Expired entries are invisible to every read even before the periodic
/// sweep removes them.
#[derive(Debug)]
pub struct SemanticQueryCache {
    default_ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    near_duplicate_hits: AtomicU64,
    last_cleared: RwLock<Option<DateTime<Utc>>>,
}

impl SemanticQueryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            near_duplicate_hits: AtomicU64::new(0),
            last_cleared: RwLock::new(None),
        }
    }

    /// Start the periodic removal of expired entries.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        SweepHandle::spawn("query_cache", interval, self, |cache| {
            cache.purge_expired();
        })
    }

    pub fn get(&self, key: &str) -> Option<CachedQuery> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: remove it unless a writer refreshed it meanwhile.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` under `key`. `None` uses the cache's default TTL.
    pub fn set(&self, key: &str, value: CachedQuery, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
    }

    /// Attach retrieval results to a live entry. Returns `false` when the
    /// entry is missing or expired.
    pub fn record_results(&self, key: &str, file_id: &str, results: &[ChunkResult]) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.value.file_id = Some(file_id.to_string());
                entry.value.results = results.to_vec();
                true
            }
            _ => false,
        }
    }

    pub fn delete(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .last_cleared
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        tracing::info!("query cache cleared");
    }

    /// Drop the results recorded for `file_id` from every entry, keeping
    /// the query embeddings. Returns how many entries were touched.
    pub fn invalidate_file(&self, file_id: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut invalidated = 0;
        for entry in entries.values_mut() {
            if entry.value.file_id.as_deref() == Some(file_id) {
                entry.value.file_id = None;
                entry.value.results.clear();
                invalidated += 1;
            }
        }
        if invalidated > 0 {
            tracing::debug!(file_id, invalidated, "dropped cached results for file");
        }
        invalidated
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(removed, "query cache sweep removed expired entries");
        }
        removed
    }

    /// Best live entry whose embedding has cosine similarity at least
    /// `threshold` with `embedding`. Entries whose vectors cannot be
    /// compared are skipped. `exclude` names a key to ignore, typically
    /// the caller's own entry.
    pub fn find_similar(
        &self,
        embedding: &[f64],
        threshold: f64,
        exclude: Option<&str>,
    ) -> Option<(CachedQuery, String)> {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let mut best: Option<(&String, &Entry, f64)> = None;
        for (key, entry) in entries.iter() {
            if entry.is_expired(now) || exclude == Some(key.as_str()) {
                continue;
            }
            let Ok(similarity) = cosine_similarity(embedding, &entry.value.embedding) else {
                continue;
            };
            if best.map_or(true, |(_, _, s)| similarity > s) {
                best = Some((key, entry, similarity));
            }
        }

        match best {
            Some((key, entry, similarity)) if similarity >= threshold => {
                self.near_duplicate_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(similarity, "query cache near-duplicate match");
                Some((entry.value.clone(), key.clone()))
            }
            _ => None,
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            size: self.len(),
            max_size: None,
            evictions: 0,
            hit_rate: CacheStats::compute_hit_rate(hits, misses),
            near_duplicate_hits: Some(self.near_duplicate_hits.load(Ordering::Relaxed)),
            last_cleared: *self
                .last_cleared
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}
