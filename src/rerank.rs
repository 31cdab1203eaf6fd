//! Intent-specific reordering of retrieved chunks.
//!
//! Runs after retrieval and before the context-window cut:
//!
//! | Intent | Reordering |
//! |--------|------------|
//! | comparison | `comparison` chunks first, then the table naming every key term at the top |
//! | definition | the chunk where the defined term is most prominent at the top |
//! | list | `list` chunks first |
//!
//! All moves are stable with respect to the remaining chunks.

use crate::chunk::ChunkType;
use crate::intent::QueryIntent;
use crate::models::ChunkResult;

const TABLE_MARKERS: [&str; 2] = ["comparison table:", "comparison of"];
const VS_MARKERS: [&str; 3] = [" vs ", " vs. ", " versus "];
const PROMINENCE_WINDOW: usize = 200;

pub fn rerank(
    intent: QueryIntent,
    question: &str,
    key_terms: &[String],
    results: Vec<ChunkResult>,
) -> Vec<ChunkResult> {
    match intent {
        QueryIntent::Comparison => prioritize_comparison(results, question, key_terms),
        QueryIntent::Definition => match key_terms.first() {
            Some(term) => prioritize_definition(results, term),
            None => results,
        },
        QueryIntent::List => prioritize_type(results, ChunkType::List),
        _ => results,
    }
}

/// Stable partition: chunks of type `chunk_type` first.
pub fn prioritize_type(results: Vec<ChunkResult>, chunk_type: ChunkType) -> Vec<ChunkResult> {
    let (mut matching, rest): (Vec<_>, Vec<_>) = results
        .into_iter()
        .partition(|r| r.chunk_type() == Some(chunk_type.as_str()));
    if !matching.is_empty() {
        tracing::debug!(chunk_type = %chunk_type, count = matching.len(), "prioritized chunks by type");
    }
    matching.extend(rest);
    matching
}

fn is_comparison_table(lowered: &str) -> bool {
    TABLE_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Whether the question asks for one specific comparison table, in which
/// case a perfectly matching table is returned on its own.
pub fn is_specific_table_query(question: &str, key_terms: &[String]) -> bool {
    if key_terms.len() < 2 {
        return false;
    }
    let q = question.to_lowercase();
    let has_vs = VS_MARKERS.iter().any(|m| q.contains(m));
    q.contains("comparison of")
        || (q.contains("compare") && has_vs)
        || (has_vs && q.contains("comparison"))
}

pub fn prioritize_comparison(
    results: Vec<ChunkResult>,
    question: &str,
    key_terms: &[String],
) -> Vec<ChunkResult> {
    let mut results = prioritize_type(results, ChunkType::Comparison);

    let terms: Vec<String> = key_terms.iter().map(|t| t.to_lowercase()).collect();
    let perfect = results.iter().position(|r| {
        let lowered = r.text.to_lowercase();
        is_comparison_table(&lowered) && terms.iter().all(|t| lowered.contains(t.as_str()))
    });

    let Some(idx) = perfect else {
        return results;
    };
    if idx > 0 {
        let table = results.remove(idx);
        results.insert(0, table);
        tracing::debug!(from = idx, chunk_id = %results[0].id, "perfect comparison table moved to top");
    }

    if is_specific_table_query(question, key_terms) {
        results.truncate(1);
        tracing::debug!("specific table query, keeping only the matching table");
    }
    results
}

/// How prominently `term` (lowercase) features in `text`; 0 when absent.
pub fn prominence_score(text: &str, term: &str) -> usize {
    let lowered = text.to_lowercase();
    if term.is_empty() || !lowered.contains(term) {
        return 0;
    }

    let mut score = 0;
    if lowered.starts_with(term) {
        score += 100;
    }

    let head: String = lowered.chars().take(PROMINENCE_WINDOW).collect();
    if head.contains(term) {
        score += 50;
    }
    let standalone = head.contains(&format!("{} ", term))
        || head.contains(&format!("{}\n", term))
        || head.contains(&format!(" {} ", term));
    if standalone {
        score += 30;
    }

    if text.chars().count() > PROMINENCE_WINDOW {
        score += 10;
    }
    score + lowered.matches(term).count() * 5
}

/// Move the chunk with the highest prominence score for `term` to the
/// top. The earliest chunk wins ties.
pub fn prioritize_definition(mut results: Vec<ChunkResult>, term: &str) -> Vec<ChunkResult> {
    let term = term.to_lowercase();
    let mut best: Option<(usize, usize)> = None;
    for (i, r) in results.iter().enumerate() {
        let score = prominence_score(&r.text, &term);
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((i, score));
        }
    }

    if let Some((idx, score)) = best {
        if idx > 0 {
            let chunk = results.remove(idx);
            results.insert(0, chunk);
        }
        tracing::debug!(term = %term, from = idx, score, "definition chunk placed first");
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, CHUNK_TYPE};

    fn result(id: &str, text: &str, chunk_type: &str) -> ChunkResult {
        let mut metadata = Metadata::new();
        metadata.insert(CHUNK_TYPE.into(), chunk_type.into());
        ChunkResult {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
            distance: 0.5,
        }
    }

    fn ids(results: &[ChunkResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_type_partition_is_stable() {
        let results = vec![
            result("a", "x", "narrative"),
            result("b", "x", "list"),
            result("c", "x", "narrative"),
            result("d", "x", "list"),
        ];
        assert_eq!(ids(&prioritize_type(results, ChunkType::List)), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_perfect_table_moves_to_top() {
        let results = vec![
            result("a", "WiFi 6 versus older radios", "comparison"),
            result("b", "Routers in general", "narrative"),
            result(
                "c",
                "COMPARISON TABLE: Comparison of WiFi 5 and WiFi 6",
                "comparison",
            ),
        ];
        let out = prioritize_comparison(
            results,
            "tell me how wifi 5 and wifi 6 differ",
            &terms(&["wifi", "5", "6"]),
        );
        assert_eq!(ids(&out), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_specific_table_query_keeps_only_table() {
        let results = vec![
            result("a", "Background on radios", "narrative"),
            result("t", "COMPARISON TABLE: TCP vs UDP\n\nTCP: reliable", "comparison"),
        ];
        let out = prioritize_comparison(results, "comparison of TCP and UDP", &terms(&["tcp", "udp"]));
        assert_eq!(ids(&out), vec!["t"]);
    }

    #[test]
    fn test_specific_table_query_detection() {
        let two = terms(&["tcp", "udp"]);
        assert!(is_specific_table_query("Comparison of TCP and UDP", &two));
        assert!(is_specific_table_query("compare tcp vs udp", &two));
        assert!(is_specific_table_query("tcp versus udp comparison", &two));
        assert!(!is_specific_table_query("what is the difference between tcp and udp", &two));
        assert!(!is_specific_table_query("comparison of tcp", &terms(&["tcp"])));
    }

    #[test]
    fn test_prominence_score() {
        // prefix 100 + head 50 + standalone 30 + one occurrence 5
        assert_eq!(prominence_score("Latency is the delay.", "latency"), 185);
        // head 50 + standalone 30 + one occurrence 5
        assert_eq!(prominence_score("Low latency matters", "latency"), 85);
        assert_eq!(prominence_score("nothing here", "latency"), 0);
    }

    #[test]
    fn test_definition_prefers_prominent_chunk() {
        let results = vec![
            result("a", "Networks care about low latency sometimes", "narrative"),
            result("b", "Latency is the time a packet takes to arrive.", "narrative"),
            result("c", "Unrelated text", "narrative"),
        ];
        let out = rerank(QueryIntent::Definition, "what is latency", &terms(&["latency"]), results);
        assert_eq!(ids(&out), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_other_intents_untouched() {
        let results = vec![result("a", "x", "list"), result("b", "y", "comparison")];
        let out = rerank(QueryIntent::Specific, "how fast", &[], results);
        assert_eq!(ids(&out), vec!["a", "b"]);
    }
}
