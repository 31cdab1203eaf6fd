//! Document chunking pipeline.
//!
//! Turns extracted document text into [`Chunk`]s in four steps:
//!
//! 1. [`TextNormalizer`] strips layout artifacts and normalizes whitespace.
//! 2. [`TableProcessor`] finds one-cell-per-line tables and flattens them
//!    into `COMPARISON TABLE: ...` text.
//! 3. [`SemanticTextSplitter`] packs paragraphs (or sentences) into
//!    target-sized pieces with overlap; each table stays one piece.
//! 4. [`metadata`] attaches position, key terms and a chunk type.
//!
//! Chunk ids are `{file_id}_{ordinal}` with contiguous ordinals starting
//! at 0. Offsets refer to the normalized text.

pub mod metadata;
mod normalize;
mod splitter;
mod table;

pub use metadata::{detect_chunk_type, extract_table_metadata, ChunkType};
pub use normalize::{normalize_for_embedding, TextNormalizer};
pub use splitter::{SemanticTextSplitter, TextPiece};
pub use table::{is_table_title, TableProcessor, TextSegment};

use chrono::Utc;

use crate::config::ChunkingConfig;
use crate::models::{chunk_id, Chunk};
use crate::terms::KeyTermExtractor;
use metadata::{build_metadata, chunk_key_terms, ChunkPosition};

/// The configured chunking steps, reusable across documents.
#[derive(Debug, Clone)]
pub struct ChunkingPipeline {
    normalizer: TextNormalizer,
    tables: TableProcessor,
    splitter: SemanticTextSplitter,
    extractor: KeyTermExtractor,
    chars_per_token: usize,
}

impl Default for ChunkingPipeline {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

impl ChunkingPipeline {
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            normalizer: TextNormalizer::from_config(config),
            tables: TableProcessor::new(),
            splitter: SemanticTextSplitter::from_config(config),
            extractor: KeyTermExtractor::new(),
            chars_per_token: config.chars_per_token.max(1),
        }
    }

    /// Chunk one document. Blank input yields no chunks.
    pub fn chunk_document(&self, file_id: &str, text: &str) -> Vec<Chunk> {
        let normalized = self.normalizer.normalize(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let segments = self.tables.process(&normalized);
        let pieces = self.splitter.split_segments(&segments);
        let timestamp = Utc::now().timestamp();

        tracing::debug!(
            file_id,
            segments = segments.len(),
            tables = segments.iter().filter(|s| s.is_table).count(),
            chunks = pieces.len(),
            "chunked document"
        );

        pieces
            .into_iter()
            .map(|piece| {
                let key_terms = chunk_key_terms(&self.extractor, &piece.text);
                let position = ChunkPosition {
                    file_id,
                    chunk_index: piece.index,
                    start_char: piece.start_char,
                    end_char: piece.end_char,
                };
                let metadata = build_metadata(
                    &position,
                    &piece.text,
                    &key_terms,
                    self.chars_per_token,
                    timestamp,
                );
                Chunk {
                    id: chunk_id(file_id, piece.index),
                    text: piece.text,
                    start_char: piece.start_char,
                    end_char: piece.end_char,
                    metadata,
                }
            })
            .collect()
    }
}

/// Chunk `text` with a pipeline built from `config`.
pub fn chunk_document(file_id: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    ChunkingPipeline::from_config(config).chunk_document(file_id, text)
}
