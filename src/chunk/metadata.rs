//! Per-chunk metadata: salient terms and a coarse content type.
//!
//! `key_terms` feeds keyword search and `chunk_type` feeds intent-specific
//! reranking, so both are computed once at chunking time and stored with
//! the chunk.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use crate::models::{Metadata, CHUNK_TYPE, FILE_ID, KEY_TERMS};
use crate::terms::KeyTermExtractor;

static COMPARISON_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"comparison|difference|versus|\bvs\b").expect("valid comparison regex")
});
static LIST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\s*[\d•\-\*]",
        r"\n\s*[\d•\-\*]",
        r"(first|second|third|finally)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid list pattern"))
    .collect()
});
static TECHNOLOGY_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(wifi|wi-fi|802\.11[a-z]*)\s*(\d+|[a-z]{1,2})").expect("valid tech regex")
});
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("valid cleanup regex"));

/// Coarse classification of a chunk's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Comparison,
    List,
    Table,
    Technical,
    Narrative,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Comparison => "comparison",
            ChunkType::List => "list",
            ChunkType::Table => "table",
            ChunkType::Technical => "technical",
            ChunkType::Narrative => "narrative",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First match wins: comparison wording, list markers, column-aligned
/// layout, term-dense short text, else narrative.
pub fn detect_chunk_type(text: &str, key_terms: &[String]) -> ChunkType {
    if COMPARISON_WORDS.is_match(&text.to_lowercase()) {
        return ChunkType::Comparison;
    }

    if LIST_PATTERNS.iter().any(|re| re.is_match(text)) {
        return ChunkType::List;
    }

    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() > 3 {
        let aligned = lines
            .iter()
            .filter(|l| l.matches('\t').count() > 1 || l.matches("  ").count() > 3)
            .count();
        if aligned > 2 {
            return ChunkType::Table;
        }
    }

    if key_terms.len() > 5 && text.split_whitespace().count() < 200 {
        return ChunkType::Technical;
    }

    ChunkType::Narrative
}

/// Terms recovered from flattened table text: technology/version pairs
/// from comparison titles, bullet labels, and words of row headers.
pub fn extract_table_metadata(text: &str) -> Vec<String> {
    let mut terms = Vec::new();

    for line in text.split('\n').map(str::trim) {
        if line.to_lowercase().contains("comparison") {
            for caps in TECHNOLOGY_VERSION.captures_iter(line) {
                let tech = caps[1].to_lowercase();
                let versioned = format!("{} {}", tech, &caps[2]);
                terms.push(tech);
                terms.push(versioned);
            }
            terms.push("comparison".to_string());
        }

        if line.starts_with('•') || line.starts_with('-') {
            if let Some((label, _)) = line.split_once(':') {
                let label = label.trim_start_matches(['•', '-']).trim().to_lowercase();
                let label = NON_WORD.replace_all(&label, "");
                if label.chars().count() > 2 {
                    terms.push(label.into_owned());
                }
            }
        }

        if line.ends_with(':') && !line.starts_with('•') {
            let header = line.trim_end_matches(':').to_lowercase();
            terms.extend(
                header
                    .split_whitespace()
                    .filter(|w| w.chars().count() >= 4)
                    .map(str::to_string),
            );
        }
    }

    terms
}

/// Extracted query terms plus table terms, deduplicated in first-seen order.
pub fn chunk_key_terms(extractor: &KeyTermExtractor, text: &str) -> Vec<String> {
    let mut terms = extractor.extract(text);
    terms.extend(extract_table_metadata(text));
    let mut seen = HashSet::new();
    terms.retain(|t| seen.insert(t.clone()));
    terms
}

/// Position and content fields stored with every chunk.
pub struct ChunkPosition<'a> {
    pub file_id: &'a str,
    pub chunk_index: usize,
    pub start_char: usize,
    pub end_char: usize,
}

pub fn build_metadata(
    position: &ChunkPosition<'_>,
    text: &str,
    key_terms: &[String],
    chars_per_token: usize,
    timestamp: i64,
) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(FILE_ID.into(), position.file_id.into());
    metadata.insert("chunk_index".into(), position.chunk_index.into());
    metadata.insert("start_char".into(), position.start_char.into());
    metadata.insert("end_char".into(), position.end_char.into());
    metadata.insert(
        "estimated_tokens".into(),
        (text.len() / chars_per_token.max(1)).into(),
    );
    if !key_terms.is_empty() {
        metadata.insert(KEY_TERMS.into(), key_terms.join(",").into());
        metadata.insert("term_count".into(), key_terms.len().into());
    }
    metadata.insert(
        CHUNK_TYPE.into(),
        detect_chunk_type(text, key_terms).as_str().into(),
    );
    metadata.insert("timestamp".into(), timestamp.into());
    metadata
}
