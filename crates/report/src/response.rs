use dproc_core::{display_value, extract_json, extract_list, number_value, parse_float_str};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{ReportError, Result};
use crate::spec::VariableType;

static BULLET_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-*•]\s*").expect("valid regex"));

/// A model response converted to its variable's declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub value: Value,
    pub warning: Option<String>,
}

impl ParsedResponse {
    fn clean(value: Value) -> Self {
        Self {
            value,
            warning: None,
        }
    }
}

/// With `structured` set, lists and JSON are pulled out of surrounding prose;
/// otherwise the response must already be in the target shape.
pub fn parse_response(kind: VariableType, raw: &str, structured: bool) -> Result<ParsedResponse> {
    match kind {
        VariableType::Markdown | VariableType::String => {
            Ok(ParsedResponse::clean(Value::String(raw.trim().to_string())))
        }
        VariableType::StringList => {
            let items = if structured {
                let items = extract_list(raw);
                if items.is_empty() {
                    legacy_list(raw)
                } else {
                    items
                }
            } else {
                legacy_list(raw)
            };
            Ok(ParsedResponse::clean(Value::Array(
                items.into_iter().map(Value::String).collect(),
            )))
        }
        VariableType::Json => {
            let value = if structured {
                extract_json(raw).map_err(|err| ReportError::ResponseParse {
                    kind: "json",
                    message: err.to_string(),
                })?
            } else {
                serde_json::from_str(raw.trim()).map_err(|err| ReportError::ResponseParse {
                    kind: "json",
                    message: err.to_string(),
                })?
            };
            Ok(ParsedResponse::clean(value))
        }
        VariableType::Number => Ok(match parse_float_str(raw.trim()) {
            Some(number) if number.is_finite() => ParsedResponse::clean(number_value(number)),
            _ => ParsedResponse {
                value: Value::from(0),
                warning: Some(format!(
                    "Could not parse number from response: {}",
                    raw.trim().chars().take(40).collect::<String>()
                )),
            },
        }),
    }
}

/// JSON array if the response is one, otherwise one item per non-empty line
/// with any bullet marker stripped.
pub fn legacy_list(raw: &str) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw.trim()) {
        return items.iter().map(display_value).collect();
    }
    raw.lines()
        .map(str::trim)
        .map(|line| BULLET_PREFIX.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(kind: VariableType, raw: &str) -> Value {
        parse_response(kind, raw, true).unwrap().value
    }

    #[test]
    fn text_is_trimmed() {
        assert_eq!(parse(VariableType::Markdown, "\n  ## Summary\n\n"), json!("## Summary"));
    }

    #[test]
    fn lists_fall_back_to_line_splitting() {
        assert_eq!(
            parse(VariableType::StringList, "Risks:\n- churn\n* supply\n3. pricing"),
            json!(["churn", "supply", "pricing"])
        );
        assert_eq!(
            parse(VariableType::StringList, "churn\n\n-\nsupply"),
            json!(["churn", "supply"])
        );
        assert_eq!(
            parse_response(VariableType::StringList, r#"["a", 2]"#, false).unwrap().value,
            json!(["a", "2"])
        );
    }

    #[test]
    fn json_is_extracted_from_prose_only_when_structured() {
        let raw = "Here is the data:\n```json\n{\"a\":1}\n```";
        assert_eq!(parse(VariableType::Json, raw), json!({"a": 1}));
        let err = parse_response(VariableType::Json, raw, false).unwrap_err();
        assert!(matches!(err, ReportError::ResponseParse { kind: "json", .. }));
        assert!(parse_response(VariableType::Json, "no json at all", true).is_err());
    }

    #[test]
    fn numbers_default_to_zero_with_warning() {
        assert_eq!(parse(VariableType::Number, " 42.5 units"), json!(42.5));
        let parsed = parse_response(VariableType::Number, "about forty", true).unwrap();
        assert_eq!(parsed.value, json!(0));
        assert!(parsed.warning.unwrap().starts_with("Could not parse number"));
    }
}
