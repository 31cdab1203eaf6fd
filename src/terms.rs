//! Salient-term extraction from questions.
//!
//! Terms drive keyword search, comparison retrieval and chunk metadata.
//! Stop words cover English and Turkish. Purely numeric tokens are always
//! kept because they carry the meaning in version comparisons
//! ("WiFi 5 and 6").

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid punctuation regex"));

static CONJUNCTION_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-zA-Z0-9]+)\s+(and|ve|,)\s+([a-zA-Z0-9]+)").expect("valid conjunction regex")
});

const STOP_WORDS: &[&str] = &[
    // English
    "the", "is", "are", "was", "were", "what", "whats", "what's", "how", "why", "when", "where",
    "who", "which", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
    "by", "from", "up", "about", "into", "through", "during", "before", "after", "above", "below",
    "between", "under", "again", "further", "then", "once", "here", "there", "all", "both",
    "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own",
    "same", "so", "than", "too", "very", "can", "will", "just", "difference", "differences",
    "compare", "comparison", "versus", "vs", "among", "you", "your", "yours", "this", "that",
    "these", "those", "me", "my", "mine", "we", "our", "ours", "file", "document", "text",
    "content",
    // Turkish
    "nedir", "ne", "nasıl", "neden", "niçin", "nerede", "kim", "hangi", "bir", "ve", "veya",
    "ile", "için", "üzerinde", "altında", "arasında", "içinde", "dışında", "önce", "sonra", "bu",
    "şu", "o", "bunlar", "şunlar", "onlar", "ben", "sen", "biz", "siz", "fark", "farkı",
    "farklar", "karşılaştır", "karşılaştırma", "arasındaki",
];

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Stop-word aware term extractor. Cheap to clone; holds only the
/// stop-word set.
#[derive(Debug, Clone)]
pub struct KeyTermExtractor {
    stop_words: HashSet<&'static str>,
}

impl Default for KeyTermExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyTermExtractor {
    pub fn new() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().copied().collect(),
        }
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    /// Lowercase, strip punctuation, split on whitespace, and keep tokens
    /// that are numeric or at least three characters long and are not stop
    /// words. First-seen order, no duplicates.
    pub fn extract(&self, query: &str) -> Vec<String> {
        let lowered = query.to_lowercase();
        let cleaned = PUNCTUATION.replace_all(&lowered, " ");

        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        for word in cleaned.split_whitespace() {
            let long_enough = word.chars().count() >= 3 || is_number(word);
            if !long_enough || self.is_stop_word(word) || !seen.insert(word) {
                continue;
            }
            terms.push(word.to_string());
        }
        terms
    }

    /// [`extract`](Self::extract) plus the operands of `X and Y`, `X ve Y`
    /// and `X , Y` pairs, deduplicated in first-seen order.
    pub fn extract_named_terms(&self, query: &str) -> Vec<String> {
        let mut terms = self.extract(query);
        let lowered = query.to_lowercase();

        for caps in CONJUNCTION_PAIR.captures_iter(&lowered) {
            for idx in [1, 3] {
                if let Some(m) = caps.get(idx) {
                    let term = m.as_str().trim();
                    if term.chars().count() >= 3 && !self.is_stop_word(term) {
                        terms.push(term.to_string());
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        terms
    }
}

/// Query variants used by expansion retrieval for comparison questions:
/// the original question, three definition-style variants per term, and
/// two comparison variants per pair of terms.
pub fn expand_query_for_comparison(original: &str, terms: &[String]) -> Vec<String> {
    let mut queries = vec![original.to_string()];
    for term in terms {
        queries.push(format!("what is {}", term));
        queries.push(format!("{} definition", term));
        queries.push(term.clone());
    }
    for (i, a) in terms.iter().enumerate() {
        for b in &terms[i + 1..] {
            queries.push(format!("difference between {} and {}", a, b));
            queries.push(format!("{} vs {}", a, b));
        }
    }
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keeps_numbers_and_drops_stop_words() {
        let e = KeyTermExtractor::new();
        assert_eq!(
            e.extract("Compare WiFi 5 and WiFi 6"),
            vec!["wifi".to_string(), "5".to_string(), "6".to_string()]
        );
    }

    #[test]
    fn test_extract_strips_punctuation_and_short_words() {
        let e = KeyTermExtractor::new();
        assert_eq!(
            e.extract("What's the latency of 5G, really?!"),
            vec!["latency".to_string(), "really".to_string()]
        );
        assert!(e.extract("is it ok").is_empty());
    }

    #[test]
    fn test_extract_turkish_stop_words() {
        let e = KeyTermExtractor::new();
        assert_eq!(
            e.extract("smishing vishing phishing farkı nedir"),
            vec![
                "smishing".to_string(),
                "vishing".to_string(),
                "phishing".to_string()
            ]
        );
    }

    #[test]
    fn test_named_terms_recovers_conjunction_operands() {
        let e = KeyTermExtractor::new();
        assert_eq!(
            e.extract_named_terms("compare WiFi 5 and WiFi 6"),
            vec!["wifi".to_string(), "5".to_string(), "6".to_string()]
        );
        assert_eq!(
            e.extract_named_terms("tcp and udp"),
            vec!["tcp".to_string(), "udp".to_string()]
        );
    }

    #[test]
    fn test_expand_query_for_comparison() {
        let terms = vec!["tcp".to_string(), "udp".to_string()];
        let variants = expand_query_for_comparison("tcp vs udp?", &terms);
        assert_eq!(
            variants,
            vec![
                "tcp vs udp?",
                "what is tcp",
                "tcp definition",
                "tcp",
                "what is udp",
                "udp definition",
                "udp",
                "difference between tcp and udp",
                "tcp vs udp",
            ]
        );
    }

    #[test]
    fn test_expand_with_single_term_has_no_pairs() {
        let variants = expand_query_for_comparison("q", &["x".to_string()]);
        assert_eq!(variants.len(), 4);
    }
}
