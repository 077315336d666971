use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{column_names, round2};
use crate::normalize::{looks_like_date, parse_date, to_iso};
use crate::record::{as_number, display_value, is_blank, Record};
use crate::schema::boolean_like;

const TOP_VALUES: usize = 10;
const RANGE_SHARE: f64 = 0.8;
const DATE_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Unknown,
    Numeric,
    Boolean,
    Date,
    Array,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub null_count: usize,
    pub null_percentage: f64,
    pub unique_count: usize,
    pub fill_rate: f64,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: String,
    pub latest: String,
    pub span_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RangeStats {
    Numeric(NumericRange),
    Date(DateRange),
}

/// Extended per-column statistics. An empty record set serializes as
/// `{"record_count": 0}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub columns: IndexMap<String, ColumnStats>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub distributions: IndexMap<String, Vec<ValueCount>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub ranges: IndexMap<String, RangeStats>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsCalculator;

impl StatsCalculator {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(&self, records: &[Record]) -> DatasetStats {
        let mut stats = DatasetStats {
            record_count: records.len(),
            ..DatasetStats::default()
        };
        if records.is_empty() {
            return stats;
        }
        let total = records.len() as f64;
        for name in column_names(records) {
            let values: Vec<&Value> = records
                .iter()
                .filter_map(|record| record.get(&name))
                .filter(|value| !is_blank(Some(value)))
                .collect();
            let null_count = records.len() - values.len();
            let texts: Vec<String> = values.iter().map(|v| display_value(v)).collect();
            let unique_count = texts.iter().collect::<HashSet<_>>().len();
            let kind = infer_column_kind(&values, &texts);
            stats.columns.insert(
                name.clone(),
                ColumnStats {
                    null_count,
                    null_percentage: round2(null_count as f64 / total * 100.0),
                    unique_count,
                    fill_rate: round2(values.len() as f64 / total * 100.0),
                    kind,
                },
            );
            let distribution = top_values(&texts, records.len());
            if !distribution.is_empty() {
                stats.distributions.insert(name.clone(), distribution);
            }
            if let Some(range) = numeric_range(&values) {
                stats.ranges.insert(name.clone(), RangeStats::Numeric(range));
            }
            if kind == ColumnKind::Date {
                if let Some(range) = date_range(&texts) {
                    stats
                        .ranges
                        .insert(format!("{name}_range"), RangeStats::Date(range));
                }
            }
        }
        debug!(
            records = stats.record_count,
            columns = stats.columns.len(),
            "dataset stats calculated"
        );
        stats
    }
}

fn infer_column_kind(values: &[&Value], texts: &[String]) -> ColumnKind {
    if values.is_empty() {
        return ColumnKind::Unknown;
    }
    if values.iter().all(|v| as_number(v).is_some()) {
        return ColumnKind::Numeric;
    }
    if values.iter().all(|v| boolean_like(v).is_some()) {
        return ColumnKind::Boolean;
    }
    let dates = texts.iter().filter(|t| looks_like_date(t)).count();
    if dates as f64 / values.len() as f64 >= DATE_SHARE {
        return ColumnKind::Date;
    }
    let listy = values
        .iter()
        .any(|v| v.is_array() || matches!(v, Value::String(s) if s.contains(',')));
    if listy {
        return ColumnKind::Array;
    }
    ColumnKind::String
}

fn top_values(texts: &[String], record_count: usize) -> Vec<ValueCount> {
    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for text in texts {
        *counts.entry(text.as_str()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(TOP_VALUES)
        .map(|(value, count)| ValueCount {
            value: value.to_string(),
            count,
            percentage: round2(count as f64 / record_count as f64 * 100.0),
        })
        .collect()
}

fn numeric_range(values: &[&Value]) -> Option<NumericRange> {
    let mut numbers: Vec<f64> = values.iter().filter_map(|v| as_number(v)).collect();
    if numbers.is_empty() || (numbers.len() as f64) < values.len() as f64 * RANGE_SHARE {
        return None;
    }
    numbers.sort_by(|a, b| a.total_cmp(b));
    let n = numbers.len() as f64;
    let mean = numbers.iter().sum::<f64>() / n;
    let mid = numbers.len() / 2;
    let median = if numbers.len() % 2 == 0 {
        (numbers[mid - 1] + numbers[mid]) / 2.0
    } else {
        numbers[mid]
    };
    let variance = numbers.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(NumericRange {
        min: numbers[0],
        max: numbers[numbers.len() - 1],
        mean,
        median,
        std_dev: variance.sqrt(),
    })
}

fn date_range(texts: &[String]) -> Option<DateRange> {
    let mut dates: Vec<_> = texts.iter().filter_map(|t| parse_date(t)).collect();
    dates.sort();
    let earliest = *dates.first()?;
    let latest = *dates.last()?;
    let seconds = (latest - earliest).num_seconds() as f64;
    Some(DateRange {
        earliest: to_iso(&earliest),
        latest: to_iso(&latest),
        span_days: (seconds / 86_400.0).ceil() as i64,
    })
}
