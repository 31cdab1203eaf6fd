//! Text cleanup applied before table detection and splitting.
//!
//! Extracted document text carries layout noise: page numbers, running
//! headers and footers, tab-aligned columns, soft hyphens and words broken
//! across lines. [`TextNormalizer::normalize`] removes that noise while
//! keeping line structure (tables and lists are detected line by line
//! afterwards). [`normalize_for_embedding`] is the much lighter pass used
//! on chunk text right before it is embedded.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::ChunkingConfig;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static HORIZONTAL_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid whitespace regex"));
static TRIPLE_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*[-*•]\s+|\s*\d+\.\s+)").expect("valid list marker regex")
});
static LIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([-*•]\s+|\d+\.\s+|[a-z]\)\s+)").expect("valid list line regex")
});

static PAGE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"^[Pp]age\s+\d+$", r"^-\s*\d+\s*-$", r"^\d+\s*of\s*\d+$"]
        .iter()
        .map(|p| Regex::new(p).expect("valid page pattern"))
        .collect()
});
static HEADER_FOOTER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^Copyright\s+©",
        r"^©\s+\d{4}",
        r"All rights reserved",
        r"^Confidential",
        r"^Draft",
        r"^\d{1,2}/\d{1,2}/\d{2,4}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid header/footer pattern"))
    .collect()
});

static HYPHENATED_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-[ \t]*\n[ \t]*(\w)").expect("valid hyphenation regex"));
static LONG_ELLIPSIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.{4,}").expect("valid ellipsis regex"));
static REPEATED_BANG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!{2,}").expect("valid punctuation regex"));
static REPEATED_QUESTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?{2,}").expect("valid punctuation regex"));

const INVISIBLE_CHARS: [char; 5] = ['\u{00AD}', '\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Lines longer than this are never treated as running headers.
const MAX_REPEATED_HEADER_LEN: usize = 100;
/// A short line seen this many more times elsewhere is a running header.
const REPEATED_HEADER_OCCURRENCES: usize = 3;

#[derive(Debug, Clone)]
pub struct TextNormalizer {
    pub strip_layout_artifacts: bool,
    pub preserve_lists: bool,
    pub max_consecutive_newlines: usize,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self {
            strip_layout_artifacts: true,
            preserve_lists: true,
            max_consecutive_newlines: 2,
        }
    }
}

impl TextNormalizer {
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            max_consecutive_newlines: config.max_consecutive_newlines.max(1),
            ..Self::default()
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut text = normalize_line_endings(text);
        if self.strip_layout_artifacts {
            text = strip_artifacts(&text);
        }
        text = self.collapse_whitespace(&text);
        text = self.limit_consecutive_newlines(&text);
        text = cleanup_patterns(&text);
        text.trim().to_string()
    }

    fn collapse_whitespace(&self, text: &str) -> String {
        text.split('\n')
            .map(|line| {
                let line = line.replace('\t', " ");
                if self.preserve_lists && is_list_line(&line) {
                    if let Some(marker) = LIST_MARKER.find(&line) {
                        let rest = line[marker.end()..].trim();
                        return format!(
                            "{} {}",
                            marker.as_str().trim_end(),
                            WHITESPACE_RUN.replace_all(rest, " ")
                        );
                    }
                }
                WHITESPACE_RUN.replace_all(&line, " ").trim().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn limit_consecutive_newlines(&self, text: &str) -> String {
        let max = self.max_consecutive_newlines;
        let mut out = String::with_capacity(text.len());
        let mut run = 0usize;
        for c in text.chars() {
            if c == '\n' {
                run += 1;
                if run > max {
                    continue;
                }
            } else {
                run = 0;
            }
            out.push(c);
        }
        out
    }
}

/// Minimal cleanup for embedding input: line endings, horizontal
/// whitespace and runs of blank lines.
pub fn normalize_for_embedding(text: &str) -> String {
    let text = normalize_line_endings(text);
    let text = HORIZONTAL_WHITESPACE.replace_all(&text, " ");
    let text = TRIPLE_NEWLINE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_artifacts(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len().saturating_sub(1);

    let mut kept = Vec::with_capacity(lines.len());
    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            kept.push(line);
            continue;
        }
        if is_page_number(line) || is_header_footer(line) || is_only_special_chars(line) {
            continue;
        }
        if i > 0 && i < last && is_repeated_header(line, &lines, i) {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn cleanup_patterns(text: &str) -> String {
    let text: String = text.chars().filter(|c| !INVISIBLE_CHARS.contains(c)).collect();
    let text = HYPHENATED_BREAK.replace_all(&text, "$1$2");
    let text = LONG_ELLIPSIS.replace_all(&text, "...");
    let text = REPEATED_BANG.replace_all(&text, "!");
    REPEATED_QUESTION.replace_all(&text, "?").into_owned()
}

fn is_list_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && LIST_LINE.is_match(trimmed)
}

fn is_page_number(line: &str) -> bool {
    if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
        return line.parse::<u64>().is_ok_and(|n| n < 10_000);
    }
    PAGE_PATTERNS.iter().any(|re| re.is_match(line))
}

fn is_header_footer(line: &str) -> bool {
    if line.chars().count() < 5 {
        return false;
    }
    HEADER_FOOTER_PATTERNS.iter().any(|re| re.is_match(line))
}

fn is_only_special_chars(line: &str) -> bool {
    !line.trim().is_empty() && !line.chars().any(char::is_alphanumeric)
}

fn is_repeated_header(line: &str, lines: &[&str], current: usize) -> bool {
    if line.len() > MAX_REPEATED_HEADER_LEN {
        return false;
    }
    let occurrences = lines
        .iter()
        .enumerate()
        .filter(|(i, l)| *i != current && l.trim() == line)
        .count();
    occurrences >= REPEATED_HEADER_OCCURRENCES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_page_numbers_and_footers() {
        let n = TextNormalizer::default();
        let text = "Intro line\r\n12\r\nPage 3\r\n- 4 -\r\n5 of 9\r\nAll rights reserved 2024\r\nBody text";
        assert_eq!(n.normalize(text), "Intro line\nBody text");
    }

    #[test]
    fn test_drops_symbol_only_lines() {
        let n = TextNormalizer::default();
        assert_eq!(n.normalize("Heading\n.........\nText"), "Heading\nText");
    }

    #[test]
    fn test_removes_repeated_running_headers() {
        let n = TextNormalizer::default();
        let text = "Start\nACME Manual\nA\nACME Manual\nB\nACME Manual\nC\nACME Manual\nEnd";
        assert_eq!(n.normalize(text), "Start\nA\nB\nC\nEnd");
    }

    #[test]
    fn test_collapses_whitespace_but_keeps_list_markers() {
        let n = TextNormalizer::default();
        let text = "Some\t\tspaced    words\n-   first   item\n2.  second    item";
        assert_eq!(
            n.normalize(text),
            "Some spaced words\n- first item\n2. second item"
        );
    }

    #[test]
    fn test_limits_blank_lines() {
        let n = TextNormalizer::default();
        assert_eq!(n.normalize("One\n\n\n\n\nTwo"), "One\n\nTwo");

        let single = TextNormalizer {
            max_consecutive_newlines: 1,
            ..TextNormalizer::default()
        };
        assert_eq!(single.normalize("One\n\n\nTwo"), "One\nTwo");
    }

    #[test]
    fn test_cleanup_patterns() {
        let n = TextNormalizer::default();
        assert_eq!(
            n.normalize("inter-\nnational soft\u{00AD}ware\u{200B} wait..... really!!! why??"),
            "international software wait... really! why?"
        );
    }

    #[test]
    fn test_normalize_for_embedding_is_light() {
        assert_eq!(
            normalize_for_embedding("  a \t b\r\n\n\n\nc\n12  "),
            "a b\n\nc\n12"
        );
    }
}
