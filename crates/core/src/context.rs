use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

pub const DEFAULT_CONTEXT_WINDOW: usize = 8000;
pub const TOKENS_PER_CHAR: f64 = 0.25;
pub const DEFAULT_FIT_RESERVE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const PARAGRAPH_OVERLAP: usize = 100;
pub const TRUNCATION_MARKER: &str = "\n\n[... truncated ...]";
pub const OMISSION_MARKER: &str = "\n\n[... content omitted ...]\n\n";

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("valid regex"));

/// Token budgeting with a fixed chars-per-token heuristic. All lengths are in
/// chars, never bytes, so cuts always land on a char boundary.
#[derive(Debug, Clone, Copy)]
pub struct ContextManager {
    max_tokens: usize,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl ContextManager {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn estimate_tokens(&self, text: &str) -> usize {
        (text.chars().count() as f64 * TOKENS_PER_CHAR).ceil() as usize
    }

    pub fn fits(&self, text: &str, reserve: usize) -> bool {
        self.estimate_tokens(text) <= self.max_tokens.saturating_sub(reserve)
    }

    /// Number of chars left once `reserve` tokens are set aside.
    pub fn available_chars(&self, reserve: usize) -> usize {
        (self.max_tokens.saturating_sub(reserve) as f64 / TOKENS_PER_CHAR).floor() as usize
    }

    /// Percentage of the window the text would consume.
    pub fn usage(&self, text: &str) -> f64 {
        if self.max_tokens == 0 {
            return 100.0;
        }
        self.estimate_tokens(text) as f64 / self.max_tokens as f64 * 100.0
    }

    pub fn truncate(&self, text: &str, reserve: usize) -> String {
        if self.fits(text, reserve) {
            return text.to_string();
        }
        let max_chars = self.available_chars(reserve);
        debug!(
            tokens = self.estimate_tokens(text),
            max_chars, "truncating text to fit context window"
        );
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str(TRUNCATION_MARKER);
        out
    }

    /// Overlapping windows of at most `available_chars(reserve)` chars. Each
    /// window after the first starts `overlap` chars before the previous end.
    pub fn chunk_text(&self, text: &str, reserve: usize, overlap: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let max_chars = self.available_chars(reserve).max(1);
        if chars.len() <= max_chars {
            return vec![text.to_string()];
        }
        let overlap = overlap.min(max_chars - 1);
        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + max_chars).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start = end - overlap;
        }
        debug!(chunks = chunks.len(), max_chars, overlap, "text chunked");
        chunks
    }

    /// Greedily packs blank-line separated paragraphs into chunks that fit.
    /// A paragraph that is too large on its own is split with `chunk_text`.
    pub fn chunk_by_paragraphs(&self, text: &str, reserve: usize) -> Vec<String> {
        let max_chars = self.available_chars(reserve).max(1);
        let mut chunks = Vec::new();
        let mut current = String::new();
        for paragraph in PARAGRAPH_BREAK.split(text) {
            let candidate_len = if current.is_empty() {
                paragraph.chars().count()
            } else {
                current.chars().count() + 2 + paragraph.chars().count()
            };
            if candidate_len <= max_chars {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(paragraph);
                continue;
            }
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if paragraph.chars().count() > max_chars {
                chunks.extend(self.chunk_text(paragraph, reserve, PARAGRAPH_OVERLAP));
            } else {
                current.push_str(paragraph);
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    /// Keeps the first and last 40% of `max_chars`, marking the gap.
    pub fn summarize_for_context(&self, text: &str, max_chars: usize) -> String {
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= max_chars {
            return text.to_string();
        }
        let keep = (max_chars as f64 * 0.4).floor() as usize;
        let head: String = chars[..keep].iter().collect();
        let tail: String = chars[chars.len() - keep..].iter().collect();
        format!("{head}{OMISSION_MARKER}{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn estimates_a_quarter_token_per_char() {
        let manager = ContextManager::default();
        assert_eq!(manager.estimate_tokens(""), 0);
        assert_eq!(manager.estimate_tokens("abcde"), 2);
        assert_eq!(manager.estimate_tokens("éééé"), 1);
    }

    #[test]
    fn fit_respects_reserve() {
        let manager = ContextManager::new(10);
        let text = "x".repeat(24);
        assert!(manager.fits(&text, 4));
        assert!(!manager.fits(&text, 5));
        assert!(!manager.fits("x", 11));
    }

    #[test]
    fn truncate_cuts_and_marks() {
        let manager = ContextManager::new(10);
        let text = "y".repeat(100);
        let out = manager.truncate(&text, 5);
        assert_eq!(out, format!("{}{}", "y".repeat(20), TRUNCATION_MARKER));
        assert_eq!(manager.truncate("short", 5), "short");
    }

    #[test]
    fn chunks_overlap_and_cover() {
        let manager = ContextManager::new(5);
        let text: String = ('a'..='z').collect();
        let chunks = manager.chunk_text(&text, 0, 5);
        assert_eq!(chunks[0], "abcdefghijklmnopqrst");
        assert_eq!(chunks[1], "pqrstuvwxyz");
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn oversized_overlap_still_advances() {
        let manager = ContextManager::new(1);
        let chunks = manager.chunk_text("abcdefghij", 0, 50);
        assert_eq!(chunks.first().map(String::as_str), Some("abcd"));
        assert!(chunks.last().unwrap().ends_with('j'));
        let zero_budget = ContextManager::new(0).chunk_text("abc", 0, 10);
        assert_eq!(zero_budget, vec!["a", "b", "c"]);
    }

    #[test]
    fn paragraphs_are_packed_greedily() {
        let manager = ContextManager::new(50);
        let text = format!(
            "{}\n\n{}\n\n\n{}",
            "a".repeat(80),
            "b".repeat(80),
            "c".repeat(300)
        );
        let chunks = manager.chunk_by_paragraphs(&text, 0);
        assert_eq!(chunks[0], format!("{}\n\n{}", "a".repeat(80), "b".repeat(80)));
        assert_eq!(chunks[1], "c".repeat(200));
        assert_eq!(chunks[2], "c".repeat(200));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn summary_keeps_head_and_tail() {
        let manager = ContextManager::default();
        let text: String = "0123456789".repeat(3);
        let out = manager.summarize_for_context(&text, 10);
        assert_eq!(out, format!("0123{OMISSION_MARKER}6789"));
    }

    #[test]
    fn usage_is_a_percentage() {
        let manager = ContextManager::new(100);
        assert_eq!(manager.usage(&"z".repeat(200)), 50.0);
    }

    proptest! {
        #[test]
        fn chunking_terminates_and_reconstructs(
            text in "[a-z \\n]{1,400}",
            window in 1usize..40,
            overlap in 0usize..60,
        ) {
            let manager = ContextManager::new(window);
            let chunks = manager.chunk_text(&text, 0, overlap);
            let max_chars = manager.available_chars(0);
            let effective = overlap.min(max_chars - 1);
            let mut rebuilt: String = chunks[0].clone();
            for chunk in &chunks[1..] {
                rebuilt.extend(chunk.chars().skip(effective));
            }
            prop_assert_eq!(rebuilt, text);
            prop_assert!(chunks.iter().all(|c| c.chars().count() <= max_chars));
        }
    }
}
