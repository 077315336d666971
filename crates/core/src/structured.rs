//! Recovers structured values from free-form model output.
//!
//! Every extractor is line or pattern based and never fails on odd input; only
//! [`extract_json`] reports an error, after all of its strategies are exhausted.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{DprocError, Result};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid regex"));
static LAZY_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*?\}|\[.*?\]").expect("valid regex"));
static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+\.)\s+(.+)$").expect("valid regex"));
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#+\s+(.+)").expect("valid regex"));
static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)[.)]\s+(.+)").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static KEY_VALUE: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"\*\*([^*:]+):\*\*\s*(.+)").expect("valid regex"),
        Regex::new(r"\*\*([^*:]+):\s*\*\*(.+)").expect("valid regex"),
        Regex::new(r"^\s*([A-Za-z0-9_][A-Za-z0-9_ \t]*):\s*(.+)").expect("valid regex"),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberedItem {
    pub number: u32,
    pub title: String,
    pub description: String,
}

/// Finds the first JSON object or array in `text`.
///
/// Tries, in order: the first fenced code block (optionally tagged `json`),
/// every lazily matched `{...}` / `[...]` span, then a bracket-balanced scan
/// that can recover nested values the lazy match cuts short.
pub fn extract_json(text: &str) -> Result<Value> {
    if let Some(block) = FENCED_BLOCK.captures(text).and_then(|caps| caps.get(1)) {
        let candidate = block.as_str().trim();
        if candidate.starts_with('{') || candidate.starts_with('[') {
            match serde_json::from_str::<Value>(candidate) {
                Ok(value) => return Ok(value),
                Err(err) => warn!(error = %err, "fenced block is not valid JSON"),
            }
        }
    }

    for found in LAZY_JSON.find_iter(text) {
        if let Some(value) = parse_container(found.as_str()) {
            return Ok(value);
        }
    }

    for (start, _) in text.match_indices(['{', '[']) {
        if let Some(end) = balanced_end(&text[start..]) {
            if let Some(value) = parse_container(&text[start..start + end]) {
                debug!(offset = start, "JSON recovered by bracket scan");
                return Ok(value);
            }
        }
    }

    Err(DprocError::NoJsonFound)
}

fn parse_container(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

/// Byte length of the bracketed value at the start of `text`, honoring strings.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Bullet (`-`, `*`, `•`) and `N.` lines, markers stripped.
pub fn extract_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| LIST_ITEM.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|item| item.as_str().trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// First pipe line is the header, the second is skipped as the separator.
pub fn extract_table(text: &str) -> Vec<IndexMap<String, String>> {
    let lines: Vec<&str> = text.lines().filter(|line| line.contains('|')).collect();
    if lines.len() < 2 {
        return Vec::new();
    }
    let headers: Vec<&str> = lines[0]
        .split('|')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .collect();

    lines[2..]
        .iter()
        .map(|line| {
            let cells: Vec<&str> = line
                .split('|')
                .map(str::trim)
                .enumerate()
                .filter(|(idx, _)| *idx > 0 && *idx <= headers.len())
                .map(|(_, cell)| cell)
                .collect();
            headers
                .iter()
                .enumerate()
                .map(|(idx, header)| {
                    let cell = cells.get(idx).copied().unwrap_or_default();
                    (header.to_string(), cell.to_string())
                })
                .collect::<IndexMap<_, _>>()
        })
        .filter(|row| row.values().any(|cell| !cell.is_empty()))
        .collect()
}

/// Splits on markdown headings; text before the first heading is `intro`.
pub fn extract_sections(text: &str) -> IndexMap<String, String> {
    let mut sections = IndexMap::new();
    let mut current = "intro".to_string();
    let mut content: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = HEADING.captures(line) {
            if !content.is_empty() {
                sections.insert(current, content.join("\n").trim().to_string());
            }
            current = section_key(&caps[1]);
            content.clear();
        } else {
            content.push(line);
        }
    }
    if !content.is_empty() {
        sections.insert(current, content.join("\n").trim().to_string());
    }
    sections
}

fn section_key(heading: &str) -> String {
    WHITESPACE
        .replace_all(&heading.trim().to_lowercase(), "_")
        .into_owned()
}

pub fn extract_numbered_items(text: &str) -> Vec<NumberedItem> {
    let mut items = Vec::new();
    let mut current: Option<NumberedItem> = None;

    for line in text.lines() {
        if let Some(caps) = NUMBERED.captures(line) {
            items.extend(current.take());
            current = Some(NumberedItem {
                number: caps[1].parse().unwrap_or_default(),
                title: caps[2].trim().to_string(),
                description: String::new(),
            });
        } else if let Some(item) = current.as_mut() {
            let line = line.trim();
            if !line.is_empty() {
                if !item.description.is_empty() {
                    item.description.push(' ');
                }
                item.description.push_str(line);
            }
        }
    }
    items.extend(current);
    items
}

/// `**Key:** value`, `**Key: **value` and `Key: value` lines. The first
/// occurrence of a key wins; keys have whitespace runs replaced by `_`.
pub fn extract_key_value(text: &str) -> IndexMap<String, String> {
    let mut result = IndexMap::new();
    for pattern in KEY_VALUE.iter() {
        for line in text.lines() {
            let Some(caps) = pattern.captures(line) else {
                continue;
            };
            let key = WHITESPACE.replace_all(caps[1].trim(), "_").into_owned();
            let value = caps[2].trim().to_string();
            if !key.is_empty() && !value.is_empty() && !result.contains_key(&key) {
                result.insert(key, value);
            }
        }
    }
    result
}
