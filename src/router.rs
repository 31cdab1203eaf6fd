//! Per-document in-memory vector indexes.
//!
//! Each actively queried document gets a [`FileVectorIndex`] holding every
//! chunk embedding of that document. Indexes are replaced whole, never
//! patched, so a concurrent search sees either the old or the new index.
//! They are evicted only by staleness: a background sweep drops any index
//! not accessed within the configured TTL.
//!
//! # Search
//!
//! [`FileVectorRouter::search_in_file`] scores every chunk against the
//! query on the rayon pool, split into at most four contiguous runs. Each
//! chunk writes into its own pre-sized slot, so the final ordering (by
//! distance, ties in scan order) does not depend on which run finished
//! first. Chunks whose vectors cannot be compared with the query are
//! skipped.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::cache::ChunkEmbeddingCache;
use crate::embedding::{cosine_similarity, similarity_to_distance};
use crate::error::{ensure_identifier, RetrievalResult};
use crate::models::{ChunkEmbedding, SimilarityResult};
use crate::sweep::SweepHandle;

/// Upper bound on parallel scoring runs per search.
const MAX_SEARCH_WORKERS: usize = 4;

/// All chunk embeddings of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct FileVectorIndex {
    pub file_id: String,
    pub chunks: Vec<ChunkEmbedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chunk_count: usize,
}

#[derive(Debug)]
struct IndexSlot {
    index: Arc<FileVectorIndex>,
    /// Nanoseconds since the router's epoch.
    last_access: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterStats {
    pub indexed_files: usize,
    pub total_chunks: usize,
    pub max_age_hours: f64,
}

/// Registry of per-file indexes with TTL eviction.
#[derive(Debug)]
pub struct FileVectorRouter {
    indexes: RwLock<HashMap<String, IndexSlot>>,
    max_age: Duration,
    epoch: Instant,
    chunk_cache: Option<Arc<ChunkEmbeddingCache>>,
}

impl FileVectorRouter {
    /// `max_age` is the inactivity TTL after which an index is evicted.
    pub fn new(max_age: Duration) -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
            max_age,
            epoch: Instant::now(),
            chunk_cache: None,
        }
    }

    /// Report every returned chunk to `cache` for popularity tracking.
    pub fn with_chunk_cache(mut self, cache: Arc<ChunkEmbeddingCache>) -> Self {
        self.chunk_cache = Some(cache);
        self
    }

    /// Start the periodic eviction of stale indexes.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        SweepHandle::spawn("file_router", interval, self, |router| {
            router.sweep_expired();
        })
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Install a complete index for `file_id`, replacing any existing one.
    /// The creation time of a replaced index is kept.
    pub fn add_or_sync_index(
        &self,
        file_id: &str,
        chunks: Vec<ChunkEmbedding>,
    ) -> RetrievalResult<()> {
        ensure_identifier(file_id)?;
        let now = Utc::now();
        let chunk_count = chunks.len();

        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        let created_at = indexes
            .get(file_id)
            .map_or(now, |slot| slot.index.created_at);
        let replaced = indexes.contains_key(file_id);

        let index = FileVectorIndex {
            file_id: file_id.to_string(),
            chunks,
            created_at,
            updated_at: now,
            chunk_count,
        };
        indexes.insert(
            file_id.to_string(),
            IndexSlot {
                index: Arc::new(index),
                last_access: AtomicU64::new(self.now_nanos()),
            },
        );
        drop(indexes);

        tracing::info!(
            file_id,
            chunks = chunk_count,
            action = if replaced { "updated" } else { "created" },
            "file index installed"
        );
        Ok(())
    }

    /// Current index for `file_id`, refreshing its access time.
    pub fn get_index(&self, file_id: &str) -> Option<Arc<FileVectorIndex>> {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        indexes.get(file_id).map(|slot| {
            slot.last_access.store(self.now_nanos(), Ordering::Relaxed);
            Arc::clone(&slot.index)
        })
    }

    pub fn has_index(&self, file_id: &str) -> bool {
        self.indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(file_id)
    }

    pub fn remove_index(&self, file_id: &str) -> bool {
        let removed = self
            .indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(file_id)
            .is_some();
        if removed {
            tracing::info!(file_id, "file index removed");
        }
        removed
    }

    /// Top `top_k` chunks of `file_id` by ascending cosine distance.
    ///
    /// Returns `Ok(None)` when the file has no index; the caller then falls
    /// back to the external store.
    pub fn search_in_file(
        &self,
        file_id: &str,
        query: &[f64],
        top_k: usize,
    ) -> RetrievalResult<Option<Vec<SimilarityResult>>> {
        ensure_identifier(file_id)?;
        let Some(index) = self.get_index(file_id) else {
            tracing::debug!(file_id, "no in-memory index for file");
            return Ok(None);
        };

        let mut results: Vec<SimilarityResult> = score_chunks(query, &index.chunks)
            .into_iter()
            .flatten()
            .collect();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(CmpOrdering::Equal)
        });
        results.truncate(top_k);

        if let Some(cache) = &self.chunk_cache {
            for result in &results {
                cache.record_access(&result.id);
            }
        }
        Ok(Some(results))
    }

    /// Drop every index whose last access is older than the TTL. Returns
    /// how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.now_nanos();
        let max_age = u64::try_from(self.max_age.as_nanos()).unwrap_or(u64::MAX);

        let mut indexes = self.indexes.write().unwrap_or_else(PoisonError::into_inner);
        let before = indexes.len();
        indexes.retain(|_, slot| {
            now.saturating_sub(slot.last_access.load(Ordering::Relaxed)) <= max_age
        });
        let removed = before - indexes.len();
        if removed > 0 {
            tracing::info!(removed, "file router sweep removed expired indexes");
        }
        removed
    }

    /// Load and install indexes for the files that do not have one yet.
    /// Loader failures and empty loads are logged and skipped. Returns the
    /// number of indexes installed.
    pub async fn warm_cache<F, Fut>(&self, file_ids: &[String], loader: F) -> usize
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<ChunkEmbedding>>>,
    {
        let mut warmed = 0;
        for file_id in file_ids {
            if self.has_index(file_id) {
                continue;
            }
            match loader(file_id.clone()).await {
                Ok(chunks) if !chunks.is_empty() => {
                    if self.add_or_sync_index(file_id, chunks).is_ok() {
                        warmed += 1;
                    }
                }
                Ok(_) => tracing::debug!(file_id = %file_id, "no chunks to warm"),
                Err(e) => {
                    tracing::warn!(file_id = %file_id, error = %e, "failed to warm file index")
                }
            }
        }
        warmed
    }

    pub fn indexed_file_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .indexes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        self.indexes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::info!("file router cleared all indexes");
    }

    pub fn stats(&self) -> RouterStats {
        let indexes = self.indexes.read().unwrap_or_else(PoisonError::into_inner);
        RouterStats {
            indexed_files: indexes.len(),
            total_chunks: indexes.values().map(|s| s.index.chunk_count).sum(),
            max_age_hours: self.max_age.as_secs_f64() / 3600.0,
        }
    }
}

/// Score every chunk into its own slot. Slots of chunks that cannot be
/// compared stay `None`.
fn score_chunks(query: &[f64], chunks: &[ChunkEmbedding]) -> Vec<Option<SimilarityResult>> {
    let n = chunks.len();
    if n == 0 {
        return Vec::new();
    }
    let workers = MAX_SEARCH_WORKERS.min(n);
    let run_len = n.div_ceil(workers);

    let mut slots: Vec<Option<SimilarityResult>> = vec![None; n];
    slots
        .par_iter_mut()
        .zip(chunks.par_iter())
        .with_min_len(run_len)
        .for_each(|(slot, chunk)| match cosine_similarity(query, &chunk.vector) {
            Ok(similarity) => {
                *slot = Some(SimilarityResult::from_embedding(
                    chunk,
                    similarity_to_distance(similarity),
                ));
            }
            Err(e) => {
                tracing::debug!(chunk_id = %chunk.chunk_id, error = %e, "skipping chunk");
            }
        });
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn make_chunk(id: &str, vector: Vec<f64>) -> ChunkEmbedding {
        ChunkEmbedding {
            chunk_id: id.to_string(),
            vector,
            text: format!("text {}", id),
            metadata: Metadata::new(),
        }
    }

    fn router() -> FileVectorRouter {
        FileVectorRouter::new(Duration::from_secs(3600))
    }

    #[test]
    fn test_search_orders_by_distance() {
        let r = router();
        r.add_or_sync_index(
            "f1",
            vec![
                make_chunk("f1_0", vec![0.0, 1.0]),
                make_chunk("f1_1", vec![1.0, 0.0]),
                make_chunk("f1_2", vec![1.0, 1.0]),
            ],
        )
        .unwrap();

        let results = r.search_in_file("f1", &[1.0, 0.0], 2).unwrap().unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["f1_1", "f1_2"]);
        assert!(results[0].distance.abs() < 1e-9);
        assert!((results[0].similarity() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ties_keep_scan_order() {
        let r = router();
        let chunks: Vec<ChunkEmbedding> = (0..50)
            .map(|i| make_chunk(&format!("f_{}", i), vec![1.0, 1.0]))
            .collect();
        r.add_or_sync_index("f", chunks).unwrap();

        let results = r.search_in_file("f", &[1.0, 1.0], 50).unwrap().unwrap();
        let ids: Vec<String> = results.into_iter().map(|r| r.id).collect();
        let expected: Vec<String> = (0..50).map(|i| format!("f_{}", i)).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_invalid_vectors_are_skipped() {
        let r = router();
        r.add_or_sync_index(
            "f",
            vec![
                make_chunk("f_0", vec![1.0, 0.0, 0.0]),
                make_chunk("f_1", vec![0.0, 0.0]),
                make_chunk("f_2", vec![0.5, 0.5]),
            ],
        )
        .unwrap();
        let results = r.search_in_file("f", &[1.0, 0.0], 10).unwrap().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "f_2");
    }

    #[test]
    fn test_missing_index_is_none_and_empty_id_is_error() {
        let r = router();
        assert!(r.search_in_file("nope", &[1.0], 3).unwrap().is_none());
        assert!(r.search_in_file("", &[1.0], 3).is_err());
        assert!(r.add_or_sync_index(" ", Vec::new()).is_err());
    }

    #[test]
    fn test_replacement_is_whole() {
        let r = router();
        r.add_or_sync_index("f", vec![make_chunk("f_0", vec![1.0])])
            .unwrap();
        let before = r.get_index("f").unwrap();
        r.add_or_sync_index(
            "f",
            vec![make_chunk("f_0", vec![1.0]), make_chunk("f_1", vec![1.0])],
        )
        .unwrap();
        let after = r.get_index("f").unwrap();

        // A reader holding the old index still sees the old contents.
        assert_eq!(before.chunk_count, 1);
        assert_eq!(after.chunk_count, 2);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn test_records_access_in_chunk_cache() {
        let cache = Arc::new(ChunkEmbeddingCache::new(10));
        let r = router().with_chunk_cache(cache.clone());
        r.add_or_sync_index(
            "f",
            vec![
                make_chunk("f_0", vec![1.0, 0.0]),
                make_chunk("f_1", vec![0.0, 1.0]),
            ],
        )
        .unwrap();
        r.search_in_file("f", &[1.0, 0.0], 1).unwrap();
        r.search_in_file("f", &[1.0, 0.0], 1).unwrap();
        assert_eq!(cache.access_count("f_0"), 2);
        assert_eq!(cache.access_count("f_1"), 0);
    }

    #[test]
    fn test_sweep_evicts_stale_indexes() {
        let r = FileVectorRouter::new(Duration::from_millis(20));
        r.add_or_sync_index("old", vec![make_chunk("old_0", vec![1.0])])
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        r.add_or_sync_index("fresh", vec![make_chunk("fresh_0", vec![1.0])])
            .unwrap();

        assert_eq!(r.sweep_expired(), 1);
        assert!(!r.has_index("old"));
        assert!(r.has_index("fresh"));
    }

    #[test]
    fn test_stats_and_clear() {
        let r = router();
        r.add_or_sync_index("a", vec![make_chunk("a_0", vec![1.0])])
            .unwrap();
        r.add_or_sync_index(
            "b",
            vec![make_chunk("b_0", vec![1.0]), make_chunk("b_1", vec![1.0])],
        )
        .unwrap();
        let stats = r.stats();
        assert_eq!(stats.indexed_files, 2);
        assert_eq!(stats.total_chunks, 3);
        assert!((stats.max_age_hours - 1.0).abs() < 1e-9);
        assert_eq!(r.indexed_file_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(r.remove_index("a"));
        assert!(!r.remove_index("a"));
        r.clear();
        assert_eq!(r.stats().indexed_files, 0);
    }

    #[tokio::test]
    async fn test_warm_cache_uses_loader_for_missing_files() {
        let r = router();
        r.add_or_sync_index("present", vec![make_chunk("present_0", vec![1.0])])
            .unwrap();
        let ids = vec![
            "present".to_string(),
            "loaded".to_string(),
            "empty".to_string(),
            "broken".to_string(),
        ];
        let warmed = r
            .warm_cache(&ids, |file_id| async move {
                match file_id.as_str() {
                    "loaded" => Ok(vec![make_chunk("loaded_0", vec![1.0])]),
                    "broken" => Err(anyhow::anyhow!("store offline")),
                    "present" => panic!("loader called for indexed file"),
                    _ => Ok(Vec::new()),
                }
            })
            .await;
        assert_eq!(warmed, 1);
        assert!(r.has_index("loaded"));
        assert!(!r.has_index("empty"));
        assert!(!r.has_index("broken"));
    }

    #[tokio::test]
    async fn test_background_sweep_evicts() {
        let r = Arc::new(FileVectorRouter::new(Duration::from_millis(10)));
        r.add_or_sync_index("f", vec![make_chunk("f_0", vec![1.0])])
            .unwrap();
        let sweep = r.start_sweep(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!r.has_index("f"));
        sweep.shutdown().await;
    }
}
