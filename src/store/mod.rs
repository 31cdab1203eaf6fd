//! External vector store abstraction.
//!
//! The [`VectorStore`] trait is the fallback the retrieval core queries
//! when no in-memory index exists for a document, and the durable home of
//! every chunk embedding. Two backends ship with the crate:
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `memory` | [`InMemoryStore`] | process-local, brute-force cosine scan |
//! | `chroma` | [`ChromaStore`] | Chroma v2 REST API over `reqwest` |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! Failures are reported as `anyhow` errors; the orchestrator turns them
//! into upstream errors and never retries store calls itself.

mod chroma;
mod memory;

pub use chroma::ChromaStore;
pub use memory::InMemoryStore;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::models::{ChunkEmbedding, ChunkResult};

/// Storage operations needed by the retrieval core.
///
/// | Method | Purpose |
/// |--------|---------|
/// | `query_similar` | nearest chunks of one file by cosine distance |
/// | `keyword_search` | lexical scoring over one file's chunks |
/// | `get_file_chunks` | every chunk embedding of a file, for index warm-up |
/// | `upsert` | insert or replace chunk embeddings of a file |
/// | `delete_chunks` | drop selected chunks of a file |
/// | `delete` | drop every chunk of a file |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name, as used in configuration.
    fn name(&self) -> &str;

    /// Up to `top_k` chunks of `file_id`, ascending by `1 - cosine`.
    async fn query_similar(
        &self,
        vector: &[f64],
        file_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkResult>>;

    /// Keyword-scored chunks of `file_id`; see
    /// [`fusion::keyword_search`](crate::fusion::keyword_search).
    async fn keyword_search(
        &self,
        keywords: &[String],
        file_id: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkResult>>;

    /// All chunks stored for `file_id`, in insertion order.
    async fn get_file_chunks(&self, file_id: &str) -> Result<Vec<ChunkEmbedding>>;

    async fn upsert(&self, file_id: &str, chunks: &[ChunkEmbedding]) -> Result<()>;

    /// Drop the chunks of `file_id` whose ids are in `chunk_ids`; unknown
    /// ids are ignored.
    async fn delete_chunks(&self, file_id: &str, chunk_ids: &[String]) -> Result<()>;

    async fn delete(&self, file_id: &str) -> Result<()>;
}

/// Build the store named by `config.backend`.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "chroma" => Ok(Arc::new(ChromaStore::new(config)?)),
        other => bail!("Unknown store backend: '{}'", other),
    }
}
