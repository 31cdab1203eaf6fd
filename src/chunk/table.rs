//! Detection and flattening of comparison tables.
//!
//! Extracted tables arrive one cell per line: a title line, then for each
//! row a header line followed by one line per column. Such a block is
//! rewritten into a self-describing text form so that both embedding and
//! keyword search can match individual cells:
//!
//! ```text
//! COMPARISON TABLE: Comparison of Wi-Fi Standards 5 6 7
//!
//! This table compares: Wi-Fi 5, Wi-Fi 6, Wi-Fi 7
//!
//!
//! Speed
//!   Wi-Fi 5: 3.5 Gbps
//!   Wi-Fi 6: 9.6 Gbps
//!   Wi-Fi 7: 46 Gbps
//! ```

use regex::Regex;
use std::sync::LazyLock;

static COMPARISON_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(comparison|table)\s+of\s+").expect("valid title regex"));
static COMPARISON_OF_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)comparison of").expect("valid title regex"));
static NUMBER_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+-\d+").expect("valid range regex"));
static VERSUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\svs\.?\s|\sversus\s").expect("valid versus regex"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid number regex"));

const MAX_ROWS: usize = 50;
const MIN_DETECTED_COLUMNS: usize = 2;
const MAX_DETECTED_COLUMNS: usize = 5;
const MIN_DETECTED_ROWS: usize = 2;

/// A contiguous piece of the normalized text. Table segments carry the
/// flattened table text; offsets always refer to the input text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub is_table: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableProcessor;

impl TableProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Split `text` into plain and table segments, in document order.
    /// Text without tables comes back as a single plain segment.
    pub fn process(&self, text: &str) -> Vec<TextSegment> {
        let lines: Vec<&str> = text.split('\n').collect();
        let mut line_starts = Vec::with_capacity(lines.len());
        let mut pos = 0;
        for line in &lines {
            line_starts.push(pos);
            pos += line.len() + 1;
        }

        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut i = 0;

        while i < lines.len() {
            if !is_table_title(lines[i].trim()) {
                i += 1;
                continue;
            }

            let table_start = line_starts[i];
            let (table_text, next) = process_table_section(&lines, i);
            let table_end = line_starts.get(next).copied().unwrap_or(text.len());

            if table_start > text_start {
                push_plain(&mut segments, text, text_start, table_start);
            }
            segments.push(TextSegment {
                text: table_text,
                start_char: table_start,
                end_char: table_end,
                is_table: next > i + 1,
            });

            text_start = table_end;
            i = next;
        }

        if text_start < text.len() {
            push_plain(&mut segments, text, text_start, text.len());
        }

        if segments.is_empty() {
            segments.push(TextSegment {
                text: text.to_string(),
                start_char: 0,
                end_char: text.len(),
                is_table: false,
            });
        }
        merge_plain_neighbours(segments)
    }
}

fn push_plain(segments: &mut Vec<TextSegment>, text: &str, start: usize, end: usize) {
    let slice = &text[start..end];
    if !slice.trim().is_empty() {
        segments.push(TextSegment {
            text: slice.to_string(),
            start_char: start,
            end_char: end,
            is_table: false,
        });
    }
}

/// A title line that yields no rows is kept as plain text; glue it back
/// onto the surrounding plain segments.
fn merge_plain_neighbours(segments: Vec<TextSegment>) -> Vec<TextSegment> {
    let mut merged: Vec<TextSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(prev) if !prev.is_table && !segment.is_table && prev.end_char == segment.start_char => {
                if !prev.text.ends_with('\n') {
                    prev.text.push('\n');
                }
                prev.text.push_str(&segment.text);
                prev.end_char = segment.end_char;
            }
            _ => merged.push(segment),
        }
    }
    merged
}

/// Heuristic for the first line of a table.
pub fn is_table_title(line: &str) -> bool {
    let lower = line.to_lowercase();

    if (lower.contains("comparison") || lower.contains("table") || lower.contains("overview"))
        && (line.contains("# Comparison")
            || line.contains("# comparison")
            || COMPARISON_OF.is_match(line))
    {
        return true;
    }

    NUMBER_RANGE.is_match(line) || VERSUS.is_match(&lower)
}

fn clean_title(title_line: &str) -> String {
    let mut title = if let Some(idx) = title_line.find("# Comparison") {
        title_line[idx + 2..].trim()
    } else if let Some(m) = COMPARISON_OF_START.find(title_line) {
        title_line[m.start()..].trim()
    } else {
        title_line
    };

    if let Some(idx) = title.find(" - ").filter(|&idx| idx > 0) {
        let after = &title[idx + 3..];
        if after.len() < 50 && !NUMBER_RANGE.is_match(after) {
            title = title[..idx].trim();
        }
    }
    if let Some(idx) = title.find(" – ").filter(|&idx| idx > 0) {
        title = title[..idx].trim();
    }
    title.lines().next().unwrap_or_default().trim().to_string()
}

/// Flatten the table whose title is `lines[start]`. Returns the rewritten
/// text and the index of the first line after the table; when no row can
/// be read, the title line itself and `start + 1`.
fn process_table_section(lines: &[&str], start: usize) -> (String, usize) {
    let title = clean_title(lines[start].trim());
    let mut i = start + 1;

    let mut column_count = column_count_from_title(&title);
    if column_count < 2 {
        column_count = detect_column_count(lines, i);
    }
    if column_count < 2 {
        return (lines[start].to_string(), start + 1);
    }

    let columns = column_names(&title, column_count);
    let mut out = format!(
        "COMPARISON TABLE: {}\n\nThis table compares: {}\n\n",
        title,
        columns.join(", ")
    );

    let mut rows = 0;
    while i < lines.len() && rows < MAX_ROWS {
        let line = lines[i].trim();
        if line.is_empty() || is_table_title(line) {
            break;
        }

        if is_placeholder_header(line) {
            i += 1;
            let mut skipped = 0;
            while skipped < column_count && i < lines.len() && !lines[i].trim().is_empty() {
                i += 1;
                skipped += 1;
            }
            continue;
        }

        let header = line;
        i += 1;

        let mut values = Vec::with_capacity(column_count);
        while values.len() < column_count && i < lines.len() {
            let value = lines[i].trim();
            if value.is_empty() || is_table_title(value) {
                break;
            }
            values.push(value);
            i += 1;
        }

        if values.len() != column_count {
            // The header line and its partial values belong to the text after the table.
            i -= values.len() + 1;
            break;
        }
        out.push_str(&format_row(header, &values, &columns));
        out.push('\n');
        rows += 1;
    }

    if rows == 0 {
        return (lines[start].to_string(), start + 1);
    }
    (out, i)
}

fn is_placeholder_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower == "feature:" || (lower.ends_with(':') && line.len() < 20)
}

fn column_count_from_title(title: &str) -> usize {
    let numbers = NUMBER.find_iter(title).count();
    if numbers >= 2 {
        numbers
    } else if VERSUS.is_match(&title.to_lowercase()) {
        2
    } else {
        0
    }
}

fn detect_column_count(lines: &[&str], start: usize) -> usize {
    let Some(first) = (start..lines.len()).find(|&i| !lines[i].trim().is_empty()) else {
        return 0;
    };
    (MIN_DETECTED_COLUMNS..=MAX_DETECTED_COLUMNS)
        .find(|&columns| looks_like_table(lines, first, columns, MIN_DETECTED_ROWS))
        .unwrap_or(0)
}

fn looks_like_table(lines: &[&str], start: usize, columns: usize, min_rows: usize) -> bool {
    let mut i = start;
    let mut rows = 0;

    while rows < min_rows && i < lines.len() {
        let header = lines[i].trim();
        if header.is_empty() {
            i += 1;
            continue;
        }
        if header.len() < 3 {
            return false;
        }
        i += 1;

        let mut values = 0;
        while values < columns && i < lines.len() && !lines[i].trim().is_empty() {
            values += 1;
            i += 1;
        }
        if values != columns {
            return false;
        }
        rows += 1;
    }
    rows >= min_rows
}

fn column_names(title: &str, count: usize) -> Vec<String> {
    let lower = title.to_lowercase();
    if lower.contains("wifi") || lower.contains("wi-fi") {
        let numbers: Vec<&str> = NUMBER.find_iter(title).map(|m| m.as_str()).collect();
        if numbers.len() >= count {
            return numbers[..count]
                .iter()
                .map(|n| format!("Wi-Fi {}", n))
                .collect();
        }
    }
    (1..=count).map(|i| format!("Column {}", i)).collect()
}

fn format_row(header: &str, values: &[&str], columns: &[String]) -> String {
    let mut row = format!("\n{}\n", header.trim());
    for (value, column) in values.iter().zip(columns) {
        let value = value.trim();
        let value = value
            .strip_prefix(&format!("{}:", column))
            .map(str::trim)
            .unwrap_or(value);
        row.push_str(&format!("  {}: {}\n", column, value));
    }
    row
}
