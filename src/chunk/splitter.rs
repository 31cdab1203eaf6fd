//! Size-bounded splitting of text segments into chunk-sized pieces.
//!
//! Plain text is cut into semantic units (paragraphs, else sentences, else
//! fixed word windows) which are packed greedily up to the target size.
//! The trailing units of a full piece are carried into the next one as
//! overlap. Flattened tables are never split.

use regex::Regex;
use std::sync::LazyLock;

use super::table::TextSegment;
use crate::config::ChunkingConfig;

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid paragraph regex"));
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("valid sentence regex"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("valid word regex"));

const WORDS_PER_WINDOW: usize = 50;
const MAX_OVERLAP_PERCENT: f64 = 0.5;

/// One chunk-sized piece of a document. Offsets refer to the text given
/// to [`SemanticTextSplitter::split_segments`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextPiece {
    pub index: usize,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub is_table: bool,
}

#[derive(Debug, Clone)]
struct Unit<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
pub struct SemanticTextSplitter {
    target_chars: usize,
    overlap_chars: usize,
    max_chunk_chars: usize,
    min_chunk_chars: usize,
    preserve_paragraphs: bool,
}

impl Default for SemanticTextSplitter {
    fn default() -> Self {
        Self::from_config(&ChunkingConfig::default())
    }
}

impl SemanticTextSplitter {
    pub fn from_config(config: &ChunkingConfig) -> Self {
        let target_chars = config.target_tokens.max(1) * config.chars_per_token.max(1);
        let overlap = config.overlap_percent.clamp(0.0, MAX_OVERLAP_PERCENT);
        Self {
            target_chars,
            overlap_chars: (target_chars as f64 * overlap) as usize,
            max_chunk_chars: config.max_chunk_chars,
            min_chunk_chars: config.min_chunk_chars,
            preserve_paragraphs: config.preserve_paragraphs,
        }
    }

    /// Split every segment; indices are contiguous across segments.
    pub fn split_segments(&self, segments: &[TextSegment]) -> Vec<TextPiece> {
        let mut pieces = Vec::new();
        for segment in segments {
            if segment.is_table {
                pieces.push(TextPiece {
                    index: pieces.len(),
                    text: segment.text.clone(),
                    start_char: segment.start_char,
                    end_char: segment.end_char,
                    is_table: true,
                });
                continue;
            }
            for (text, start, end) in self.split_text(&segment.text) {
                pieces.push(TextPiece {
                    index: pieces.len(),
                    text,
                    start_char: segment.start_char + start,
                    end_char: segment.start_char + end,
                    is_table: false,
                });
            }
        }
        pieces
    }

    /// Split one plain text into `(text, start, end)` pieces.
    pub fn split_text(&self, text: &str) -> Vec<(String, usize, usize)> {
        let units = if self.preserve_paragraphs {
            paragraphs(text)
        } else {
            sentences(text)
        };

        let mut pieces = Vec::new();
        let mut current: Vec<Unit<'_>> = Vec::new();
        let mut current_len = 0usize;

        for unit in units {
            let potential = current_len + unit.text.len();
            let over_target = potential > self.target_chars;
            let over_max = self.max_chunk_chars > 0 && potential > self.max_chunk_chars;

            if !current.is_empty() && (over_target || over_max) {
                self.emit(&current, &mut pieces);
                current = self.overlap_tail(&current);
                current_len = joined_len(&current);
            }

            if !current.is_empty() {
                current_len += 1;
            }
            current_len += unit.text.len();
            current.push(unit);
        }

        if !current.is_empty() {
            self.emit(&current, &mut pieces);
        }
        pieces
    }

    fn emit(&self, units: &[Unit<'_>], pieces: &mut Vec<(String, usize, usize)>) {
        let text = units
            .iter()
            .map(|u| u.text)
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();
        if text.len() < self.min_chunk_chars {
            return;
        }
        let start = units.first().map_or(0, |u| u.start);
        let end = units.last().map_or(start, |u| u.end);
        pieces.push((text, start, end));
    }

    /// Trailing units whose combined length stays within the overlap budget.
    fn overlap_tail<'a>(&self, units: &[Unit<'a>]) -> Vec<Unit<'a>> {
        let mut size = 0;
        let mut keep = 0;
        for unit in units.iter().rev() {
            if size + unit.text.len() > self.overlap_chars {
                break;
            }
            size += unit.text.len();
            keep += 1;
        }
        units[units.len() - keep..].to_vec()
    }
}

fn joined_len(units: &[Unit<'_>]) -> usize {
    let text: usize = units.iter().map(|u| u.text.len()).sum();
    text + units.len().saturating_sub(1)
}

/// Blank-line separated paragraphs; fewer than two fall back to sentences.
fn paragraphs(text: &str) -> Vec<Unit<'_>> {
    let mut units = Vec::new();
    let mut start = 0;
    for m in PARAGRAPH_BREAK.find_iter(text) {
        push_trimmed(&mut units, text, start, m.start());
        start = m.end();
    }
    push_trimmed(&mut units, text, start, text.len());

    if units.len() < 2 {
        return sentences(text);
    }
    units
}

/// Sentences end at `.`, `!` or `?` followed by whitespace and an
/// uppercase ASCII letter. Without any boundary the text is cut into
/// 50-word windows.
fn sentences(text: &str) -> Vec<Unit<'_>> {
    let mut units = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END.find_iter(text) {
        let next_is_upper = text[m.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase());
        if next_is_upper {
            push_trimmed(&mut units, text, last, m.end());
            last = m.end();
        }
    }

    if last == 0 {
        return word_windows(text);
    }
    push_trimmed(&mut units, text, last, text.len());
    units
}

fn word_windows(text: &str) -> Vec<Unit<'_>> {
    let words: Vec<regex::Match<'_>> = WORD.find_iter(text).collect();
    words
        .chunks(WORDS_PER_WINDOW)
        .filter_map(|window| {
            let first = window.first()?;
            let last = window.last()?;
            Some(Unit {
                text: &text[first.start()..last.end()],
                start: first.start(),
                end: last.end(),
            })
        })
        .collect()
}

fn push_trimmed<'a>(units: &mut Vec<Unit<'a>>, text: &'a str, start: usize, end: usize) {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let offset = start + (slice.len() - slice.trim_start().len());
    units.push(Unit {
        text: trimmed,
        start: offset,
        end: offset + trimmed.len(),
    });
}
