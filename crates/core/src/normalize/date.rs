use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?$",
        r"^\d{1,2}/\d{1,2}/\d{4}$",
        r"^\d{1,2}-\d{1,2}-\d{4}$",
        r"^\d{4}/\d{1,2}/\d{1,2}$",
        r"^\d{4}\.\d{2}\.\d{2}$",
        r"^[A-Za-z]{3,9}\.? \d{1,2}, \d{4}$",
        r"^\d{1,2} [A-Za-z]{3,9} \d{4}$",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%b. %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parses the date shapes found in exported spreadsheets into a UTC timestamp.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc).naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            return parsed.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// True when the text has a literal date shape and also parses.
pub fn looks_like_date(text: &str) -> bool {
    let trimmed = text.trim();
    DATE_PATTERNS.iter().any(|re| re.is_match(trimmed)) && parse_date(trimmed).is_some()
}

pub fn to_iso(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Re-serializes date strings as ISO-8601. Blank becomes null; unparseable text is kept.
pub fn normalize_date(value: &Value) -> Value {
    match value {
        Value::String(text) if text.trim().is_empty() => Value::Null,
        Value::String(text) => match parse_date(text) {
            Some(parsed) => Value::String(to_iso(&parsed)),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_common_shapes_to_iso() {
        assert_eq!(
            normalize_date(&json!("2025-01-02")),
            json!("2025-01-02T00:00:00.000Z")
        );
        assert_eq!(
            normalize_date(&json!("03/15/2024")),
            json!("2024-03-15T00:00:00.000Z")
        );
        assert_eq!(
            normalize_date(&json!("2024-03-15T10:30:00+02:00")),
            json!("2024-03-15T08:30:00.000Z")
        );
        assert_eq!(
            normalize_date(&json!("March 5, 2023")),
            json!("2023-03-05T00:00:00.000Z")
        );
    }

    #[test]
    fn iso_output_is_stable() {
        let once = normalize_date(&json!("2024.07.01"));
        assert_eq!(normalize_date(&once), once);
    }

    #[test]
    fn blanks_and_garbage() {
        assert_eq!(normalize_date(&json!("  ")), Value::Null);
        assert_eq!(normalize_date(&json!("John")), json!("John"));
        assert_eq!(normalize_date(&json!(42)), json!(42));
    }

    #[test]
    fn date_shape_requires_pattern_and_parse() {
        assert!(looks_like_date("2024-02-29"));
        assert!(!looks_like_date("2023-02-30"));
        assert!(!looks_like_date("20240101"));
        assert!(looks_like_date("1 Jan 2020"));
    }
}
