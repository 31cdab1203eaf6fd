//! In-memory [`VectorStore`] for tests and single-process use.
//!
//! Chunks are grouped by file id. Similarity search is a brute-force
//! cosine scan over the file's chunks; vectors that cannot be compared
//! with the query (length mismatch, zero magnitude) are skipped.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::VectorStore;
use crate::embedding::{cosine_similarity, similarity_to_distance};
use crate::fusion;
use crate::models::{ChunkEmbedding, ChunkResult};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    files: RwLock<HashMap<String, Vec<ChunkEmbedding>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks held for `file_id`.
    pub fn chunk_count(&self, file_id: &str) -> usize {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files.get(file_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query_similar(
        &self,
        vector: &[f64],
        file_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkResult>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let Some(chunks) = files.get(file_id) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<ChunkResult> = chunks
            .iter()
            .filter_map(|chunk| {
                cosine_similarity(vector, &chunk.vector)
                    .ok()
                    .map(|sim| ChunkResult::from_embedding(chunk, similarity_to_distance(sim)))
            })
            .collect();
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn keyword_search(
        &self,
        keywords: &[String],
        file_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkResult>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let Some(chunks) = files.get(file_id) else {
            return Ok(Vec::new());
        };
        let candidates = chunks
            .iter()
            .map(|c| (c.chunk_id.as_str(), c.text.as_str(), &c.metadata));
        Ok(fusion::keyword_search(candidates, keywords, top_k))
    }

    async fn get_file_chunks(&self, file_id: &str) -> Result<Vec<ChunkEmbedding>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        Ok(files.get(file_id).cloned().unwrap_or_default())
    }

    async fn upsert(&self, file_id: &str, chunks: &[ChunkEmbedding]) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let stored = files.entry(file_id.to_string()).or_default();
        for chunk in chunks {
            match stored.iter_mut().find(|c| c.chunk_id == chunk.chunk_id) {
                Some(existing) => *existing = chunk.clone(),
                None => stored.push(chunk.clone()),
            }
        }
        Ok(())
    }

    async fn delete_chunks(&self, file_id: &str, chunk_ids: &[String]) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = files.get_mut(file_id) {
            stored.retain(|c| !chunk_ids.contains(&c.chunk_id));
            if stored.is_empty() {
                files.remove(file_id);
            }
        }
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.remove(file_id);
        Ok(())
    }
}
