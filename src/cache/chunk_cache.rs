//! Popularity-aware LRU cache of chunk embeddings.
//!
//! Entries live in a slab of nodes threaded into a doubly linked recency
//! list (head = most recent), with a map from chunk id to slot. `get`,
//! `set` and eviction are O(1). Access counts live in a separate map that
//! is not bounded and is kept when an entry is evicted, so the cache can
//! be re-warmed by popularity later.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::CacheStats;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node {
    key: String,
    vector: Vec<f64>,
    last_access: DateTime<Utc>,
    prev: usize,
    next: usize,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<String, usize>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    popularity: HashMap<String, u64>,
    hits: u64,
    misses: u64,
    evictions: u64,
    last_cleared: Option<DateTime<Utc>>,
}

impl Inner {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        if prev == NIL {
            self.head = (next != NIL).then_some(next);
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = (prev != NIL).then_some(prev);
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head.unwrap_or(NIL);
        if let Some(head) = self.head {
            self.nodes[head].prev = idx;
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
        self.nodes[idx].last_access = Utc::now();
    }

    fn insert_front(&mut self, key: String, vector: Vec<f64>) {
        let node = Node {
            key: key.clone(),
            vector,
            last_access: Utc::now(),
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.push_front(idx);
        self.slots.insert(key, idx);
    }

    fn remove_slot(&mut self, idx: usize) -> String {
        self.unlink(idx);
        let key = std::mem::take(&mut self.nodes[idx].key);
        self.nodes[idx].vector = Vec::new();
        self.slots.remove(&key);
        self.free.push(idx);
        key
    }

    fn evict_oldest(&mut self) {
        if let Some(tail) = self.tail {
            let key = self.remove_slot(tail);
            self.evictions += 1;
            tracing::debug!(chunk_id = %key, "chunk cache evicted least recently used entry");
        }
    }
}

/// Bounded LRU of chunk id → embedding vector.
#[derive(Debug)]
pub struct ChunkEmbeddingCache {
    max_size: usize,
    inner: RwLock<Inner>,
}

impl ChunkEmbeddingCache {
    /// A `max_size` of zero is raised to one.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn get(&self, chunk_id: &str) -> Option<Vec<f64>> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.slots.get(chunk_id).copied() {
            Some(idx) => {
                inner.touch(idx);
                inner.hits += 1;
                Some(inner.nodes[idx].vector.clone())
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or update an entry and mark it most recently used. Inserting
    /// into a full cache evicts exactly the least recently used entry.
    pub fn set(&self, chunk_id: &str, vector: Vec<f64>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = inner.slots.get(chunk_id).copied() {
            inner.nodes[idx].vector = vector;
            inner.touch(idx);
            return;
        }
        if inner.slots.len() >= self.max_size {
            inner.evict_oldest();
        }
        inner.insert_front(chunk_id.to_string(), vector);
    }

    /// Bump the popularity counter, and recency when the chunk is cached.
    pub fn record_access(&self, chunk_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner.popularity.entry(chunk_id.to_string()).or_insert(0) += 1;
        if let Some(idx) = inner.slots.get(chunk_id).copied() {
            inner.touch(idx);
        }
    }

    /// Chunk ids ordered by access count, highest first. Ties are ordered
    /// by id so the answer is stable.
    pub fn most_popular(&self, limit: usize) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: Vec<(&String, u64)> =
            inner.popularity.iter().map(|(k, v)| (k, *v)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        counts
            .into_iter()
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn access_count(&self, chunk_id: &str) -> u64 {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.popularity.get(chunk_id).copied().unwrap_or(0)
    }

    /// Preload embeddings. While the cache is full only chunks that have
    /// been accessed before are admitted; entries already cached are left
    /// untouched. Returns the number of entries added.
    pub fn warm<I>(&self, chunks: I) -> usize
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut warmed = 0;
        for (chunk_id, vector) in chunks {
            if inner.slots.contains_key(&chunk_id) {
                continue;
            }
            let popular = inner.popularity.get(&chunk_id).copied().unwrap_or(0) > 0;
            if inner.slots.len() < self.max_size || popular {
                if inner.slots.len() >= self.max_size {
                    inner.evict_oldest();
                }
                inner.insert_front(chunk_id, vector);
                warmed += 1;
            }
        }
        if warmed > 0 {
            tracing::debug!(warmed, "chunk cache warmed");
        }
        warmed
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.slots.contains_key(chunk_id)
    }

    /// Cached chunk ids, most recently used first.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys = Vec::with_capacity(inner.slots.len());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            keys.push(inner.nodes[idx].key.clone());
            let next = inner.nodes[idx].next;
            cursor = (next != NIL).then_some(next);
        }
        keys
    }

    /// Remove an entry together with its popularity counter.
    pub fn delete(&self, chunk_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = inner.slots.get(chunk_id).copied() {
            inner.remove_slot(idx);
        }
        inner.popularity.remove(chunk_id);
    }

    /// Drop every entry and popularity counter. Hit/miss counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.slots.clear();
        inner.nodes.clear();
        inner.free.clear();
        inner.head = None;
        inner.tail = None;
        inner.popularity.clear();
        inner.last_cleared = Some(Utc::now());
        tracing::info!("chunk cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.slots.len(),
            max_size: Some(self.max_size),
            evictions: inner.evictions,
            hit_rate: CacheStats::compute_hit_rate(inner.hits, inner.misses),
            near_duplicate_hits: None,
            last_cleared: inner.last_cleared,
        }
    }
}
