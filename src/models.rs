//! Core data models used throughout the retrieval engine.
//!
//! These types represent the chunks, embeddings, and ranked results that
//! flow between the chunking pipeline, the vector indexes, and the
//! orchestrator.

use serde::{Deserialize, Serialize};

use crate::embedding::distance_to_similarity;

/// Free-form chunk metadata. Values are kept scalar (string, number, bool)
/// so that any external vector store can persist them unchanged.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key holding the comma-joined salient terms of a chunk.
pub const KEY_TERMS: &str = "key_terms";
/// Metadata key holding the detected chunk type (`comparison`, `list`, ...).
pub const CHUNK_TYPE: &str = "chunk_type";
/// Metadata key holding the owning file id.
pub const FILE_ID: &str = "file_id";

/// Build the stable chunk id for the `ordinal`-th chunk of a document.
pub fn chunk_id(file_id: &str, ordinal: usize) -> String {
    format!("{}_{}", file_id, ordinal)
}

/// A bounded slice of a document's text with position metadata.
///
/// Produced once per document-processing run and never mutated; a
/// reprocessed document gets a complete new set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: Metadata,
}

/// A chunk together with its embedding vector, as held by an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    pub chunk_id: String,
    pub vector: Vec<f64>,
    pub text: String,
    pub metadata: Metadata,
}

impl ChunkEmbedding {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f64>) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            vector,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
        }
    }

    pub fn key_terms(&self) -> Option<&str> {
        metadata_str(&self.metadata, KEY_TERMS)
    }
}

/// A ranked retrieval result. Lower `distance` is more relevant.
///
/// For plain semantic results `distance = 1 - cosine similarity`; fused
/// results carry a rank-derived proxy that only preserves ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub distance: f64,
}

/// Per-file similarity search output. Same shape as [`ChunkResult`].
pub type SimilarityResult = ChunkResult;

impl ChunkResult {
    pub fn from_embedding(chunk: &ChunkEmbedding, distance: f64) -> Self {
        Self {
            id: chunk.chunk_id.clone(),
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            distance,
        }
    }

    pub fn similarity(&self) -> f64 {
        distance_to_similarity(self.distance)
    }

    pub fn chunk_type(&self) -> Option<&str> {
        metadata_str(&self.metadata, CHUNK_TYPE)
    }

    pub fn key_terms(&self) -> Option<&str> {
        metadata_str(&self.metadata, KEY_TERMS)
    }
}

/// Read a string-valued metadata field.
pub fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(chunk_id("abc", 0), "abc_0");
        assert_eq!(chunk_id("file-9", 12), "file-9_12");
    }

    #[test]
    fn test_result_similarity_is_one_minus_distance() {
        let r = ChunkResult {
            id: "a".into(),
            text: String::new(),
            metadata: Metadata::new(),
            distance: 0.25,
        };
        assert!((r.similarity() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_metadata_accessors() {
        let mut metadata = Metadata::new();
        metadata.insert(CHUNK_TYPE.into(), "comparison".into());
        metadata.insert(KEY_TERMS.into(), "wifi,5,6".into());
        metadata.insert("chunk_index".into(), 3.into());
        let r = ChunkResult {
            id: "a".into(),
            text: String::new(),
            metadata,
            distance: 0.0,
        };
        assert_eq!(r.chunk_type(), Some("comparison"));
        assert_eq!(r.key_terms(), Some("wifi,5,6"));
        assert_eq!(metadata_str(&r.metadata, "chunk_index"), None);
    }
}
