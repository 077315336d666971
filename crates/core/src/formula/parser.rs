use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DprocError, Result};

static CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z_]+)\((.+)\)$").expect("valid regex"));
static AGGREGATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z_]+)\(([^()]+)\)$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
}

impl Aggregation {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "SUM" => Some(Aggregation::Sum),
            "AVG" => Some(Aggregation::Avg),
            "COUNT" => Some(Aggregation::Count),
            _ => None,
        }
    }
}

/// A parsed computed-field expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    Sum(String),
    Avg(String),
    Count,
    Min(String),
    Max(String),
    /// `n` is parsed but only the single top group is ever returned.
    Top {
        group: String,
        value: String,
        n: usize,
    },
    PercentChange {
        value: String,
        period: String,
    },
    GroupBy {
        group: String,
        aggregation: Aggregation,
        column: String,
    },
}

pub fn parse(formula: &str) -> Result<Formula> {
    let trimmed = formula.trim();
    let caps = CALL_RE
        .captures(trimmed)
        .ok_or_else(|| DprocError::InvalidFormulaSyntax(formula.to_string()))?;
    let name = &caps[1];
    let args = split_args(&caps[2])
        .ok_or_else(|| DprocError::InvalidFormulaSyntax(formula.to_string()))?;
    let arg = |idx: usize| -> Result<String> {
        args.get(idx)
            .filter(|a| !a.is_empty())
            .cloned()
            .ok_or_else(|| {
                DprocError::InvalidFormulaSyntax(format!(
                    "{formula}: {name} expects argument {}",
                    idx + 1
                ))
            })
    };
    let bare = |idx: usize| -> Result<String> {
        let value = arg(idx)?;
        if value.contains(['(', ')']) {
            return Err(DprocError::InvalidFormulaSyntax(format!(
                "{formula}: nested calls are only allowed in GROUP_BY"
            )));
        }
        Ok(value)
    };
    match name {
        "SUM" => Ok(Formula::Sum(bare(0)?)),
        "AVG" => Ok(Formula::Avg(bare(0)?)),
        "COUNT" => Ok(Formula::Count),
        "MIN" => Ok(Formula::Min(bare(0)?)),
        "MAX" => Ok(Formula::Max(bare(0)?)),
        "TOP" => Ok(Formula::Top {
            group: bare(0)?,
            value: bare(1)?,
            n: args.get(2).and_then(|n| n.parse().ok()).unwrap_or(1),
        }),
        "PERCENT_CHANGE" => Ok(Formula::PercentChange {
            value: bare(0)?,
            period: bare(1)?,
        }),
        "GROUP_BY" => {
            let group = bare(0)?;
            let inner = arg(1)?;
            let caps = AGGREGATION_RE.captures(&inner).ok_or_else(|| {
                DprocError::InvalidFormulaSyntax(format!(
                    "{formula}: GROUP_BY expects an aggregation like SUM(column)"
                ))
            })?;
            let aggregation = Aggregation::from_name(&caps[1])
                .ok_or_else(|| DprocError::UnknownFunction(caps[1].to_string()))?;
            Ok(Formula::GroupBy {
                group,
                aggregation,
                column: caps[2].trim().to_string(),
            })
        }
        other => Err(DprocError::UnknownFunction(other.to_string())),
    }
}

/// Splits on top-level commas. Returns `None` for unbalanced parentheses.
fn split_args(raw: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    if depth != 0 {
        return None;
    }
    args.push(current.trim().to_string());
    Some(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_calls() {
        assert_eq!(parse("SUM(revenue)").unwrap(), Formula::Sum("revenue".into()));
        assert_eq!(parse(" COUNT(*) ").unwrap(), Formula::Count);
        assert_eq!(
            parse("TOP(product, revenue, 3)").unwrap(),
            Formula::Top {
                group: "product".into(),
                value: "revenue".into(),
                n: 3
            }
        );
    }

    #[test]
    fn parses_group_by_aggregation() {
        assert_eq!(
            parse("GROUP_BY(region, AVG(revenue))").unwrap(),
            Formula::GroupBy {
                group: "region".into(),
                aggregation: Aggregation::Avg,
                column: "revenue".into()
            }
        );
    }

    #[test]
    fn rejects_bad_syntax() {
        for formula in ["sum(revenue)", "SUM()", "SUM revenue", "SUM(a))", "SUM(MAX(a))", "TOP(a)"] {
            let err = parse(formula).unwrap_err();
            assert!(
                matches!(err, DprocError::InvalidFormulaSyntax(_)),
                "{formula} gave {err:?}"
            );
        }
    }

    #[test]
    fn rejects_unknown_functions() {
        assert!(matches!(
            parse("MEDIAN(revenue)").unwrap_err(),
            DprocError::UnknownFunction(name) if name == "MEDIAN"
        ));
        assert!(matches!(
            parse("GROUP_BY(region, MAX(revenue))").unwrap_err(),
            DprocError::UnknownFunction(name) if name == "MAX"
        ));
    }
}
