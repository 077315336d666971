use std::cmp::Ordering;

use chrono::Datelike;
use dproc_core::normalize::parse_date;
use dproc_core::{display_value, number_value};
use serde_json::Value;

use crate::error::{ReportError, Result};

pub const FILTER_NAMES: &[&str] = &[
    "round",
    "format_number",
    "percent",
    "truncate",
    "capitalize",
    "upper",
    "lower",
    "date",
    "join",
    "first",
    "last",
    "length",
    "sort",
    "dump",
    "default",
];

/// Applies a named filter. Filters given a value of the wrong shape return it unchanged.
pub fn apply(name: &str, input: Value, args: &[Value]) -> Result<Value> {
    let value = match name {
        "round" => round(input, int_arg(args, 0).unwrap_or(0)),
        "format_number" => match input.as_f64() {
            Some(num) => Value::String(format_grouped(num)),
            None => input,
        },
        "percent" => match input.as_f64() {
            Some(num) => {
                let decimals = int_arg(args, 0).unwrap_or(1) as usize;
                Value::String(format!("{:.*}%", decimals, num * 100.0))
            }
            None => input,
        },
        "truncate" => match input {
            Value::String(text) => {
                let limit = int_arg(args, 0).unwrap_or(50) as usize;
                if text.chars().count() <= limit {
                    Value::String(text)
                } else {
                    let mut cut: String = text.chars().take(limit).collect();
                    cut.push_str("...");
                    Value::String(cut)
                }
            }
            other => other,
        },
        "capitalize" => map_string(input, |text| {
            let lower = text.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }),
        "upper" => map_string(input, |text| text.to_uppercase()),
        "lower" => map_string(input, |text| text.to_lowercase()),
        "date" => format_date(input, str_arg(args, 0).unwrap_or("short")),
        "join" => match input {
            Value::Array(items) => {
                let separator = str_arg(args, 0).unwrap_or(", ");
                Value::String(
                    items
                        .iter()
                        .map(display_value)
                        .collect::<Vec<_>>()
                        .join(separator),
                )
            }
            other => other,
        },
        "first" => match (input, int_arg(args, 0)) {
            (Value::Array(items), Some(n)) => {
                Value::Array(items.into_iter().take(n.max(0) as usize).collect())
            }
            (Value::Array(items), None) => items.into_iter().next().unwrap_or(Value::Null),
            (Value::String(text), _) => text
                .chars()
                .next()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
            (other, _) => other,
        },
        "last" => match input {
            Value::Array(mut items) => items.pop().unwrap_or(Value::Null),
            Value::String(text) => text
                .chars()
                .last()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null),
            other => other,
        },
        "length" => Value::from(match &input {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::String(text) => text.chars().count(),
            Value::Null => 0,
            _ => 1,
        }),
        "sort" => match input {
            Value::Array(mut items) => {
                let key = str_arg(args, 0);
                let reverse = args.get(1).and_then(Value::as_bool).unwrap_or(false);
                items.sort_by(|a, b| {
                    let (a, b) = match key {
                        Some(key) => (a.get(key).unwrap_or(&Value::Null), b.get(key).unwrap_or(&Value::Null)),
                        None => (a, b),
                    };
                    let ordering = compare_values(a, b);
                    if reverse {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
                Value::Array(items)
            }
            other => other,
        },
        "dump" => Value::String(serde_json::to_string_pretty(&input)?),
        "default" => match input {
            Value::Null => args.first().cloned().unwrap_or(Value::Null),
            other => other,
        },
        unknown => return Err(ReportError::UnknownFilter(unknown.to_string())),
    };
    Ok(value)
}

fn int_arg(args: &[Value], idx: usize) -> Option<i64> {
    args.get(idx).and_then(|arg| match arg {
        Value::Number(num) => num.as_f64().map(|v| v as i64),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn str_arg(args: &[Value], idx: usize) -> Option<&str> {
    args.get(idx).and_then(Value::as_str)
}

fn map_string(input: Value, f: impl FnOnce(&str) -> String) -> Value {
    match input {
        Value::String(text) => Value::String(f(&text)),
        other => other,
    }
}

fn round(input: Value, decimals: i64) -> Value {
    match input.as_f64() {
        Some(num) => {
            let factor = 10f64.powi(decimals.clamp(0, 12) as i32);
            number_value((num * factor).round() / factor)
        }
        None => input,
    }
}

/// `1234567.891` -> `1,234,567.89`: thousands separators, at most two decimals.
pub fn format_grouped(num: f64) -> String {
    if !num.is_finite() {
        return num.to_string();
    }
    let rounded = (num * 100.0).round() / 100.0;
    let negative = rounded < 0.0;
    let fixed = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let mut grouped = String::new();
    for (idx, digit) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let frac = frac_part.trim_end_matches('0');
    let mut out = String::new();
    if negative && (grouped != "0" || !frac.is_empty()) {
        out.push('-');
    }
    out.push_str(&grouped);
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

fn format_date(input: Value, format: &str) -> Value {
    let Value::String(text) = &input else {
        return input;
    };
    let Some(parsed) = parse_date(text) else {
        return input;
    };
    let date = parsed.date();
    match format {
        "short" => Value::String(format!("{}/{}/{}", date.month(), date.day(), date.year())),
        "long" => Value::String(format!(
            "{} {}, {}",
            date.format("%B"),
            date.day(),
            date.year()
        )),
        _ => input,
    }
}

pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => display_value(a).cmp(&display_value(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(name: &str, input: Value, args: &[Value]) -> Value {
        apply(name, input, args).unwrap()
    }

    #[test]
    fn numeric_filters() {
        assert_eq!(run("round", json!(3.14159), &[json!(2)]), json!(3.14));
        assert_eq!(run("round", json!(2.5), &[]), json!(3));
        assert_eq!(run("format_number", json!(1234567.891), &[]), json!("1,234,567.89"));
        assert_eq!(run("format_number", json!(-1500), &[]), json!("-1,500"));
        assert_eq!(run("format_number", json!(999.5), &[]), json!("999.5"));
        assert_eq!(run("percent", json!(0.125), &[]), json!("12.5%"));
        assert_eq!(run("percent", json!(0.5), &[json!(0)]), json!("50%"));
        assert_eq!(run("round", json!("n/a"), &[]), json!("n/a"));
    }

    #[test]
    fn text_filters() {
        assert_eq!(run("truncate", json!("abcdef"), &[json!(3)]), json!("abc..."));
        assert_eq!(run("truncate", json!("abc"), &[json!(3)]), json!("abc"));
        assert_eq!(run("capitalize", json!("hELLO world"), &[]), json!("Hello world"));
        assert_eq!(run("upper", json!("abc"), &[]), json!("ABC"));
        assert_eq!(run("date", json!("2025-01-05"), &[]), json!("1/5/2025"));
        assert_eq!(
            run("date", json!("2025-01-05T00:00:00.000Z"), &[json!("long")]),
            json!("January 5, 2025")
        );
        assert_eq!(run("date", json!("soon"), &[]), json!("soon"));
    }

    #[test]
    fn collection_filters() {
        let items = json!([{"n": "b", "v": 2}, {"n": "a", "v": 9}, {"n": "c", "v": 1}]);
        let sorted = run("sort", items.clone(), &[json!("v"), json!(true)]);
        assert_eq!(sorted[0]["n"], json!("a"));
        assert_eq!(run("length", items.clone(), &[]), json!(3));
        assert_eq!(run("first", json!([1, 2, 3]), &[]), json!(1));
        assert_eq!(run("first", json!([1, 2, 3]), &[json!(2)]), json!([1, 2]));
        assert_eq!(run("last", json!([1, 2, 3]), &[]), json!(3));
        assert_eq!(run("join", json!(["x", 1, true]), &[json!(" | ")]), json!("x | 1 | true"));
        assert_eq!(run("default", Value::Null, &[json!("none")]), json!("none"));
        assert_eq!(run("dump", json!({"a": 1}), &[]), json!("{\n  \"a\": 1\n}"));
    }

    #[test]
    fn unknown_filter_is_an_error() {
        assert!(matches!(
            apply("explode", json!(1), &[]),
            Err(ReportError::UnknownFilter(name)) if name == "explode"
        ));
    }
}
