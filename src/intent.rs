//! Pattern-based query intent classification.
//!
//! Intents are tried in a fixed priority order and the first intent with a
//! matching pattern wins:
//!
//! | Priority | Intent | Recommended top-k |
//! |---------:|--------|------------------:|
//! | 1 | `summary` | 10 |
//! | 2 | `toc` | 8 |
//! | 3 | `comparison` | 8 |
//! | 4 | `definition` | 3 |
//! | 5 | `list` | 7 |
//! | - | `specific` (fallback) | 5 |
//!
//! Patterns run against the lowercased, trimmed question.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// What the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Summary,
    #[serde(rename = "toc")]
    TableOfContents,
    Definition,
    Specific,
    Comparison,
    List,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Summary => "summary",
            QueryIntent::TableOfContents => "toc",
            QueryIntent::Definition => "definition",
            QueryIntent::Specific => "specific",
            QueryIntent::Comparison => "comparison",
            QueryIntent::List => "list",
        }
    }

    pub fn recommended_top_k(&self) -> usize {
        match self {
            QueryIntent::Summary => 10,
            QueryIntent::TableOfContents => 8,
            QueryIntent::Definition => 3,
            QueryIntent::Specific => 5,
            QueryIntent::Comparison => 8,
            QueryIntent::List => 7,
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            QueryIntent::Summary => {
                "Detected summary intent - will retrieve broad coverage of document"
            }
            QueryIntent::TableOfContents => {
                "Detected table of contents intent - will focus on structure and organization"
            }
            QueryIntent::Definition => {
                "Detected definition intent - will retrieve precise, concise explanations"
            }
            QueryIntent::Specific => {
                "Detected specific question intent - will retrieve targeted relevant chunks"
            }
            QueryIntent::Comparison => {
                "Detected comparison intent - will retrieve multiple perspectives"
            }
            QueryIntent::List => "Detected list intent - will retrieve comprehensive enumeration",
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the retrieved set is sized. Every intent is sized adaptively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Adaptive,
}

/// Retrieval hints derived from the intent and the question text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHints {
    pub intent: QueryIntent,
    pub strategy: RetrievalStrategy,
    pub recommended_top_k: usize,
    /// The term being defined, for definition questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    pub use_keyword_boost: bool,
    pub boost_comparative_chunks: bool,
    pub boost_list_chunks: bool,
}

/// Classification result for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentMetadata {
    pub intent: QueryIntent,
    pub confidence: f64,
    pub strategy: RetrievalStrategy,
    pub recommended_top_k: usize,
    pub hints: SearchHints,
    pub explanation: String,
}

const HEURISTIC_CONFIDENCE: f64 = 0.8;

static INTENT_PATTERNS: LazyLock<Vec<(QueryIntent, Vec<Regex>)>> = LazyLock::new(|| {
    let table: [(QueryIntent, &[&str]); 5] = [
        (
            QueryIntent::Summary,
            &[
                r"^(summarize|summary|overview|brief|outline|abstract)",
                r"(can you|could you|please) .* (summarize|summary)",
                r"(summarize|summary) .* (this|the) .* (file|document|text|content)",
                r"(what|tell me) .* (about|of) .* (document|file|text|content)",
                r"(give me|provide) .* (summary|overview)",
                r"main (point|idea|theme|topic)",
            ],
        ),
        (
            QueryIntent::TableOfContents,
            &[
                r"table of content",
                r"^(structure|organization|layout|sections|chapters)",
                r"what .* (cover|contain|include)",
                r"list .* (section|chapter|topic|part)",
            ],
        ),
        (
            QueryIntent::Comparison,
            &[
                r"(compar[ieaos]*|difference|versus|vs\.?)",
                r"(how .* differ|what .* difference)",
                r"(similar|similarity) .* (between|and)",
                r"\d+.*\d+",
                r"(between|among).*(and|or)",
            ],
        ),
        (
            QueryIntent::Definition,
            &[
                r"^(what is|what's|whats|define|definition of|meaning of|explain)",
                r"(what does|what do) .* mean",
                r"(tell me|explain) .* (definition|meaning)",
            ],
        ),
        (
            QueryIntent::List,
            &[
                r"^list",
                r"what are .* (all|the)",
                r"(enumerate|mention) .* ",
                r"give me .* list",
            ],
        ),
    ];

    table
        .into_iter()
        .map(|(intent, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p).expect("valid intent pattern"))
                .collect();
            (intent, compiled)
        })
        .collect()
});

static DEFINITION_TERM: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"what is ([a-zA-Z0-9\s]+)",
        r"define ([a-zA-Z0-9\s]+)",
        r"definition of ([a-zA-Z0-9\s]+)",
        r"meaning of ([a-zA-Z0-9\s]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid definition pattern"))
    .collect()
});

/// Stateless intent classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryIntentClassifier;

impl QueryIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str) -> QueryIntent {
        let normalized = query.trim().to_lowercase();
        INTENT_PATTERNS
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(&normalized)))
            .map(|(intent, _)| *intent)
            .unwrap_or(QueryIntent::Specific)
    }

    pub fn strategy(&self, _intent: QueryIntent) -> RetrievalStrategy {
        RetrievalStrategy::Adaptive
    }

    pub fn search_hints(&self, intent: QueryIntent, query: &str) -> SearchHints {
        let mut hints = SearchHints {
            intent,
            strategy: self.strategy(intent),
            recommended_top_k: intent.recommended_top_k(),
            term: None,
            use_keyword_boost: false,
            boost_comparative_chunks: intent == QueryIntent::Comparison,
            boost_list_chunks: intent == QueryIntent::List,
        };

        if intent == QueryIntent::Definition {
            let normalized = query.to_lowercase();
            let term = DEFINITION_TERM.iter().find_map(|re| {
                re.captures(&normalized)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
            });
            if let Some(term) = term {
                hints.term = Some(term);
                hints.use_keyword_boost = true;
            }
        }

        hints
    }

    pub fn analyze(&self, query: &str) -> IntentMetadata {
        let intent = self.classify(query);
        IntentMetadata {
            intent,
            confidence: HEURISTIC_CONFIDENCE,
            strategy: self.strategy(intent),
            recommended_top_k: intent.recommended_top_k(),
            hints: self.search_hints(intent, query),
            explanation: intent.explanation().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_each_intent() {
        let c = QueryIntentClassifier::new();
        assert_eq!(c.classify("Summarize this document"), QueryIntent::Summary);
        assert_eq!(c.classify("What are the main ideas?"), QueryIntent::Summary);
        assert_eq!(c.classify("table of contents please"), QueryIntent::TableOfContents);
        assert_eq!(c.classify("compare WiFi 5 and WiFi 6"), QueryIntent::Comparison);
        assert_eq!(c.classify("TCP versus UDP"), QueryIntent::Comparison);
        assert_eq!(c.classify("What is latency?"), QueryIntent::Definition);
        assert_eq!(c.classify("explain beamforming"), QueryIntent::Definition);
        assert_eq!(c.classify("list the security features"), QueryIntent::List);
        assert_eq!(c.classify("How fast is the router?"), QueryIntent::Specific);
    }

    #[test]
    fn test_comparison_outranks_definition() {
        let c = QueryIntentClassifier::new();
        assert_eq!(
            c.classify("what is the difference between tcp and udp"),
            QueryIntent::Comparison
        );
    }

    #[test]
    fn test_typo_tolerant_comparison() {
        let c = QueryIntentClassifier::new();
        assert_eq!(c.classify("comparsion of the two"), QueryIntent::Comparison);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = QueryIntentClassifier::new();
        let first = c.classify("list what is covered between chapter 1 and 2");
        for _ in 0..20 {
            assert_eq!(c.classify("list what is covered between chapter 1 and 2"), first);
        }
    }

    #[test]
    fn test_every_intent_is_sized_adaptively() {
        let classifier = QueryIntentClassifier::new();
        for intent in [
            QueryIntent::Summary,
            QueryIntent::TableOfContents,
            QueryIntent::Definition,
            QueryIntent::Comparison,
            QueryIntent::List,
            QueryIntent::Specific,
        ] {
            assert_eq!(classifier.strategy(intent), RetrievalStrategy::Adaptive);
        }
        assert_eq!(
            serde_json::to_string(&RetrievalStrategy::Adaptive).unwrap(),
            "\"adaptive\""
        );
    }

    #[test]
    fn test_analyze_comparison() {
        let meta = QueryIntentClassifier::new().analyze("compare WiFi 5 and WiFi 6");
        assert_eq!(meta.intent, QueryIntent::Comparison);
        assert_eq!(meta.recommended_top_k, 8);
        assert_eq!(meta.strategy, RetrievalStrategy::Adaptive);
        assert!((meta.confidence - 0.8).abs() < 1e-12);
        assert!(meta.hints.boost_comparative_chunks);
        assert!(!meta.hints.boost_list_chunks);
        assert!(meta.explanation.contains("comparison"));
    }

    #[test]
    fn test_definition_hints_capture_term() {
        let meta = QueryIntentClassifier::new().analyze("What is MU-MIMO?");
        assert_eq!(meta.intent, QueryIntent::Definition);
        assert_eq!(meta.recommended_top_k, 3);
        assert_eq!(meta.hints.term.as_deref(), Some("mu"));
        assert!(meta.hints.use_keyword_boost);

        let meta = QueryIntentClassifier::new().analyze("define target wake time");
        assert_eq!(meta.hints.term.as_deref(), Some("target wake time"));
    }

    #[test]
    fn test_specific_fallback() {
        let meta = QueryIntentClassifier::new().analyze("How fast is the router?");
        assert_eq!(meta.intent, QueryIntent::Specific);
        assert_eq!(meta.recommended_top_k, 5);
        assert_eq!(meta.hints.term, None);
        assert_eq!(meta.intent.to_string(), "specific");
    }
}
