use serde_json::Value;

use crate::record::{number_value, parse_float_str};

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

fn strip_decorations(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();
    cleaned.trim_end_matches('%').to_string()
}

/// `"$1,500.50"` becomes `1500.5`. Blank becomes null; unparseable text is kept.
pub fn normalize_numeric(value: &Value) -> Value {
    match value {
        Value::String(text) if text.trim().is_empty() => Value::Null,
        Value::String(text) => match parse_float_str(&strip_decorations(text)) {
            Some(number) if number.is_finite() => number_value(number),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// `"12.5%"` becomes `0.125`; values without a percent sign are treated as numeric.
pub fn normalize_percent(value: &Value) -> Value {
    match value {
        Value::String(text) if text.trim_end().ends_with('%') => {
            match parse_float_str(&strip_decorations(text)) {
                Some(number) if number.is_finite() => number_value(number / 100.0),
                _ => value.clone(),
            }
        }
        _ => normalize_numeric(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_currency_and_separators() {
        assert_eq!(normalize_numeric(&json!("$1,500.50")), json!(1500.5));
        assert_eq!(normalize_numeric(&json!("€ 2 300")), json!(2300));
        assert_eq!(normalize_numeric(&json!("45%")), json!(45));
        assert_eq!(normalize_numeric(&json!("")), Value::Null);
        assert_eq!(normalize_numeric(&json!("n/a")), json!("n/a"));
        assert_eq!(normalize_numeric(&json!(12)), json!(12));
    }

    #[test]
    fn percent_strings_become_fractions() {
        assert_eq!(normalize_percent(&json!("12.5%")), json!(0.125));
        assert_eq!(normalize_percent(&json!("0.4")), json!(0.4));
        assert_eq!(normalize_percent(&json!(0)), json!(0));
        let once = normalize_percent(&json!("50%"));
        assert_eq!(normalize_percent(&once), once);
    }
}
