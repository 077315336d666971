use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("valid regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Flattens markup-heavy text into a single clean line.
pub fn clean_text(text: &str) -> String {
    let without_refs = BRACKETED.replace_all(text, "");
    let without_tags = HTML_TAG.replace_all(&without_refs, "");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Joins the non-empty lines of a long passage into one paragraph.
pub fn clean_abstract(text: &str) -> String {
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    WHITESPACE.replace_all(&joined, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_references_and_markup() {
        let cleaned = clean_text("  The <b>results</b> [1]\n\tare  clear &amp; strong ");
        assert_eq!(cleaned, "The results are clear & strong");
        assert_eq!(clean_text(&cleaned), cleaned);
    }

    #[test]
    fn abstract_lines_are_joined() {
        let cleaned = clean_abstract("First line\r\n\r\n  second   line \n");
        assert_eq!(cleaned, "First line second line");
    }
}
