//! Merging of ranked result sets.
//!
//! - [`deduplicate`] / [`rank_and_merge`]: combine result sets that share
//!   the distance scale (e.g. several semantic searches).
//! - [`keyword_search`]: lexical scoring over chunk text and `key_terms`.
//! - [`reciprocal_rank_fusion`]: combine lists ranked on different scales
//!   (semantic + keyword) by rank alone.
//!
//! Every function orders ascending by distance and breaks ties by the
//! order in which chunks were first seen.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{metadata_str, ChunkResult, Metadata, KEY_TERMS};

/// Rank offset of reciprocal rank fusion.
pub const RRF_K: f64 = 60.0;

/// Weight of a keyword found in the chunk body.
const BODY_MATCH_SCORE: i64 = 10;
/// Weight of a keyword found in the chunk's `key_terms` metadata.
const KEY_TERM_MATCH_SCORE: i64 = 5;
/// Keyword distance proxy is `KEYWORD_DISTANCE_BASE - score`.
const KEYWORD_DISTANCE_BASE: f64 = 1000.0;

fn by_distance(a: &ChunkResult, b: &ChunkResult) -> Ordering {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
}

/// One entry per chunk id: the occurrence with the lowest distance, in
/// order of each id's first appearance.
pub fn deduplicate(chunks: Vec<ChunkResult>) -> Vec<ChunkResult> {
    let mut position: HashMap<String, usize> = HashMap::with_capacity(chunks.len());
    let mut unique: Vec<ChunkResult> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        match position.get(&chunk.id) {
            Some(&idx) => {
                if chunk.distance < unique[idx].distance {
                    unique[idx] = chunk;
                }
            }
            None => {
                position.insert(chunk.id.clone(), unique.len());
                unique.push(chunk);
            }
        }
    }
    unique
}

/// Flatten, deduplicate, sort ascending by distance and keep
/// `max_results`.
pub fn rank_and_merge(result_sets: Vec<Vec<ChunkResult>>, max_results: usize) -> Vec<ChunkResult> {
    let mut merged = deduplicate(result_sets.into_iter().flatten().collect());
    merged.sort_by(by_distance);
    merged.truncate(max_results);
    merged
}

/// Score candidates `(id, text, metadata)` against `keywords`.
///
/// Each keyword found in the lowercased body adds 10; each keyword found
/// in `key_terms` adds 5. A candidate is kept when at least one keyword
/// matched either place. Results carry `distance = 1000 - score` and are
/// ordered by score, ties in input order.
pub fn keyword_search<'a, I>(candidates: I, keywords: &[String], top_k: usize) -> Vec<ChunkResult>
where
    I: IntoIterator<Item = (&'a str, &'a str, &'a Metadata)>,
{
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    if keywords.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(i64, ChunkResult)> = Vec::new();
    for (id, text, metadata) in candidates {
        let body = text.to_lowercase();
        let mut score = 0i64;
        let mut matched = 0usize;

        for keyword in &keywords {
            if body.contains(keyword.as_str()) {
                score += BODY_MATCH_SCORE;
                matched += 1;
            }
        }
        if let Some(key_terms) = metadata_str(metadata, KEY_TERMS) {
            let key_terms = key_terms.to_lowercase();
            for keyword in &keywords {
                if key_terms.contains(keyword.as_str()) {
                    score += KEY_TERM_MATCH_SCORE;
                    if !body.contains(keyword.as_str()) {
                        matched += 1;
                    }
                }
            }
        }

        if matched > 0 {
            scored.push((
                score,
                ChunkResult {
                    id: id.to_string(),
                    text: text.to_string(),
                    metadata: metadata.clone(),
                    distance: KEYWORD_DISTANCE_BASE - score as f64,
                },
            ));
        }
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(top_k)
        .map(|(_, result)| result)
        .collect()
}

/// Fuse ranked lists with reciprocal rank fusion.
///
/// Each list adds `1 / (60 + rank)` (rank starting at 1) to the score of
/// each of its chunks. The fused distance proxy is `1 / score`, so the
/// usual ascending-distance ordering applies; it is not a cosine distance
/// and must not be converted to a similarity. The text and metadata of a
/// chunk come from the first list that contains it.
pub fn reciprocal_rank_fusion(lists: &[&[ChunkResult]], top_k: usize) -> Vec<ChunkResult> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut fused: Vec<(ChunkResult, f64)> = Vec::new();

    for list in lists {
        for (rank, result) in list.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + (rank + 1) as f64);
            match position.get(result.id.as_str()) {
                Some(&idx) => fused[idx].1 += contribution,
                None => {
                    position.insert(result.id.as_str(), fused.len());
                    fused.push((result.clone(), contribution));
                }
            }
        }
    }

    let mut results: Vec<ChunkResult> = fused
        .into_iter()
        .map(|(mut result, score)| {
            result.distance = 1.0 / score;
            result
        })
        .collect();
    results.sort_by(by_distance);
    results.truncate(top_k);
    results
}
