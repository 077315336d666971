//! Computed-field formulas evaluated over a record set.
//!
//! Values are coerced with leading-prefix parsing, and unparseable cells count
//! as 0 in sums and averages. Averages therefore include those rows in the
//! denominator.

mod parser;

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::normalize::parse_date;
use crate::record::{display_value, number_value, parse_float, Record};

pub use parser::{parse, Aggregation, Formula};

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaValue {
    Number(f64),
    Text(String),
    Map(IndexMap<String, f64>),
    Null,
}

impl FormulaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FormulaValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FormulaValue::Number(value) => number_value(*value),
            FormulaValue::Text(text) => Value::String(text.clone()),
            FormulaValue::Map(groups) => Value::Object(
                groups
                    .iter()
                    .map(|(key, value)| (key.clone(), number_value(*value)))
                    .collect::<Map<String, Value>>(),
            ),
            FormulaValue::Null => Value::Null,
        }
    }
}

impl Serialize for FormulaValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaEngine;

impl FormulaEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, formula: &str, data: &[Record]) -> Result<FormulaValue> {
        let parsed = parse(formula)?;
        Ok(self.evaluate_parsed(&parsed, data))
    }

    pub fn evaluate_parsed(&self, formula: &Formula, data: &[Record]) -> FormulaValue {
        match formula {
            Formula::Sum(column) => FormulaValue::Number(sum(data, column)),
            Formula::Avg(column) => FormulaValue::Number(avg(data, column)),
            Formula::Count => FormulaValue::Number(data.len() as f64),
            Formula::Min(column) => extreme(data, column, f64::min),
            Formula::Max(column) => extreme(data, column, f64::max),
            Formula::Top { group, value, .. } => {
                let groups = group_by(data, group, Aggregation::Sum, value);
                let mut ranked: Vec<(&String, &f64)> = groups.iter().collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(Ordering::Equal));
                FormulaValue::Text(ranked.first().map(|(k, _)| (*k).clone()).unwrap_or_default())
            }
            Formula::PercentChange { value, period } => {
                FormulaValue::Number(percent_change(data, value, period))
            }
            Formula::GroupBy {
                group,
                aggregation,
                column,
            } => FormulaValue::Map(group_by(data, group, *aggregation, column)),
        }
    }
}

fn cell(row: &Record, column: &str) -> f64 {
    row.get(column)
        .and_then(parse_float)
        .filter(|v| !v.is_nan())
        .unwrap_or(0.0)
}

fn sum(rows: &[Record], column: &str) -> f64 {
    rows.iter().map(|row| cell(row, column)).sum()
}

fn avg(rows: &[Record], column: &str) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    sum(rows, column) / rows.len() as f64
}

fn extreme(rows: &[Record], column: &str, pick: fn(f64, f64) -> f64) -> FormulaValue {
    rows.iter()
        .filter_map(|row| row.get(column).and_then(parse_float))
        .filter(|v| !v.is_nan())
        .reduce(pick)
        .map(FormulaValue::Number)
        .unwrap_or(FormulaValue::Null)
}

fn group_key(row: &Record, column: &str) -> String {
    match row.get(column) {
        None | Some(Value::Null) => "null".to_string(),
        Some(value) => display_value(value),
    }
}

fn group_by(
    rows: &[Record],
    group: &str,
    aggregation: Aggregation,
    column: &str,
) -> IndexMap<String, f64> {
    let mut buckets: IndexMap<String, Vec<&Record>> = IndexMap::new();
    for row in rows {
        buckets.entry(group_key(row, group)).or_default().push(row);
    }
    buckets
        .into_iter()
        .map(|(key, members)| {
            let total: f64 = members.iter().map(|row| cell(row, column)).sum();
            let value = match aggregation {
                Aggregation::Sum => total,
                Aggregation::Avg => total / members.len() as f64,
                Aggregation::Count => members.len() as f64,
            };
            (key, value)
        })
        .collect()
}

/// Orders rows by the period column, splits them in half and compares the sums.
fn percent_change(rows: &[Record], value: &str, period: &str) -> f64 {
    let mut ordered: Vec<(Option<chrono::NaiveDateTime>, &Record)> = rows
        .iter()
        .map(|row| {
            let when = row
                .get(period)
                .map(display_value)
                .and_then(|text| parse_date(&text));
            (when, row)
        })
        .collect();
    ordered.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    let mid = ordered.len() / 2;
    let first: f64 = ordered[..mid].iter().map(|(_, row)| cell(row, value)).sum();
    let second: f64 = ordered[mid..].iter().map(|(_, row)| cell(row, value)).sum();
    if first == 0.0 {
        return 0.0;
    }
    (second - first) / first * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DprocError;
    use serde_json::json;

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn sales() -> Vec<Record> {
        records(json!([
            {"date": "2025-01-01", "product": "Widget A", "revenue": "1500"},
            {"date": "2025-01-02", "product": "Gadget B", "revenue": "2300"}
        ]))
    }

    #[test]
    fn two_row_sales_scenario() {
        let engine = FormulaEngine::new();
        let rows = sales();
        assert_eq!(engine.evaluate("SUM(revenue)", &rows).unwrap(), FormulaValue::Number(3800.0));
        assert_eq!(engine.evaluate("AVG(revenue)", &rows).unwrap(), FormulaValue::Number(1900.0));
        assert_eq!(
            engine.evaluate("TOP(product, revenue, 1)", &rows).unwrap(),
            FormulaValue::Text("Gadget B".into())
        );
        assert_eq!(engine.evaluate("COUNT(*)", &rows).unwrap(), FormulaValue::Number(2.0));
    }

    #[test]
    fn unparseable_values_count_as_zero() {
        let rows = records(json!([
            {"revenue": "100"}, {"revenue": "n/a"}, {"revenue": "50abc"}, {}
        ]));
        let engine = FormulaEngine::new();
        assert_eq!(engine.evaluate("SUM(revenue)", &rows).unwrap(), FormulaValue::Number(150.0));
        assert_eq!(engine.evaluate("AVG(revenue)", &rows).unwrap(), FormulaValue::Number(37.5));
        assert_eq!(engine.evaluate("MIN(revenue)", &rows).unwrap(), FormulaValue::Number(50.0));
        assert_eq!(engine.evaluate("MAX(revenue)", &rows).unwrap(), FormulaValue::Number(100.0));
        assert_eq!(engine.evaluate("MAX(missing)", &rows).unwrap(), FormulaValue::Null);
    }

    #[test]
    fn top_ignores_n_and_breaks_ties_by_first_seen() {
        let rows = records(json!([
            {"p": "x", "v": 5}, {"p": "y", "v": 5}, {"p": "z", "v": 1}
        ]));
        let value = FormulaEngine::new().evaluate("TOP(p, v, 3)", &rows).unwrap();
        assert_eq!(value, FormulaValue::Text("x".into()));
        let empty = FormulaEngine::new().evaluate("TOP(p, v, 1)", &[]).unwrap();
        assert_eq!(empty, FormulaValue::Text(String::new()));
    }

    #[test]
    fn group_by_aggregations() {
        let rows = records(json!([
            {"region": "north", "revenue": 10},
            {"region": "south", "revenue": 5},
            {"region": "north", "revenue": 20},
            {"revenue": 1}
        ]));
        let engine = FormulaEngine::new();
        let sums = engine.evaluate("GROUP_BY(region, SUM(revenue))", &rows).unwrap();
        assert_eq!(sums.to_value(), json!({"north": 30, "south": 5, "null": 1}));
        let avgs = engine.evaluate("GROUP_BY(region, AVG(revenue))", &rows).unwrap();
        assert_eq!(avgs.to_value()["north"], json!(15));
        let counts = engine.evaluate("GROUP_BY(region, COUNT(revenue))", &rows).unwrap();
        assert_eq!(counts.to_value()["north"], json!(2));
    }

    #[test]
    fn percent_change_uses_chronological_halves() {
        let rows = records(json!([
            {"month": "2025-03-01", "revenue": 300},
            {"month": "2025-01-01", "revenue": 100},
            {"month": "2025-04-01", "revenue": 300},
            {"month": "2025-02-01", "revenue": 100}
        ]));
        let engine = FormulaEngine::new();
        let change = engine.evaluate("PERCENT_CHANGE(revenue, month)", &rows).unwrap();
        assert_eq!(change, FormulaValue::Number(200.0));
        let zero_base = records(json!([{"m": "2025-01-01", "v": 0}, {"m": "2025-02-01", "v": 9}]));
        assert_eq!(
            engine.evaluate("PERCENT_CHANGE(v, m)", &zero_base).unwrap(),
            FormulaValue::Number(0.0)
        );
    }

    #[test]
    fn errors_surface_from_parser() {
        let engine = FormulaEngine::new();
        assert!(matches!(
            engine.evaluate("FOO(x)", &sales()).unwrap_err(),
            DprocError::UnknownFunction(_)
        ));
        assert!(matches!(
            engine.evaluate("SUM revenue", &sales()).unwrap_err(),
            DprocError::InvalidFormulaSyntax(_)
        ));
    }
}
