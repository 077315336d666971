use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{column_names, DatasetStats};
use crate::record::{as_number, display_value, is_blank, Record};

const SAMPLE_VALUES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldSummary {
    Numeric {
        count: usize,
        sum: f64,
        mean: f64,
        min: f64,
        max: f64,
    },
    Categorical {
        count: usize,
        unique: usize,
        sample: Vec<Value>,
    },
}

/// Stats attached to every bundle. Processed loads also fill `enhanced`, whose
/// keys are flattened next to the basic ones when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleStats {
    pub row_count: usize,
    pub column_count: usize,
    pub column_names: Vec<String>,
    pub fields: IndexMap<String, FieldSummary>,
    #[serde(flatten)]
    pub enhanced: Option<DatasetStats>,
}

impl BundleStats {
    pub fn with_enhanced(mut self, enhanced: DatasetStats) -> Self {
        self.enhanced = Some(enhanced);
        self
    }
}

pub fn basic_stats(records: &[Record]) -> BundleStats {
    let names = column_names(records);
    let mut fields = IndexMap::new();
    for name in &names {
        let values: Vec<&Value> = records
            .iter()
            .filter_map(|record| record.get(name))
            .filter(|value| !is_blank(Some(value)))
            .collect();
        fields.insert(name.clone(), summarize(&values));
    }
    BundleStats {
        row_count: records.len(),
        column_count: names.len(),
        column_names: names,
        fields,
        enhanced: None,
    }
}

fn summarize(values: &[&Value]) -> FieldSummary {
    let numbers: Option<Vec<f64>> = values.iter().map(|v| as_number(v)).collect();
    match numbers {
        Some(numbers) if !numbers.is_empty() => {
            let sum: f64 = numbers.iter().sum();
            FieldSummary::Numeric {
                count: numbers.len(),
                sum,
                mean: sum / numbers.len() as f64,
                min: numbers.iter().copied().fold(f64::INFINITY, f64::min),
                max: numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            }
        }
        _ => {
            let mut seen = HashSet::new();
            let mut sample = Vec::new();
            for value in values {
                if seen.insert(display_value(value)) && sample.len() < SAMPLE_VALUES {
                    sample.push((*value).clone());
                }
            }
            FieldSummary::Categorical {
                count: values.len(),
                unique: seen.len(),
                sample,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn numeric_and_categorical_fields() {
        let rows = records(json!([
            {"product": "A", "revenue": "1500"},
            {"product": "B", "revenue": 2300},
            {"product": "A", "revenue": ""},
            {"product": "C"},
            {"product": "D"}
        ]));
        let stats = basic_stats(&rows);
        assert_eq!(stats.row_count, 5);
        assert_eq!(stats.column_names, vec!["product", "revenue"]);
        assert_eq!(
            stats.fields["revenue"],
            FieldSummary::Numeric {
                count: 2,
                sum: 3800.0,
                mean: 1900.0,
                min: 1500.0,
                max: 2300.0
            }
        );
        match &stats.fields["product"] {
            FieldSummary::Categorical { count, unique, sample } => {
                assert_eq!(*count, 5);
                assert_eq!(*unique, 4);
                assert_eq!(sample, &vec![json!("A"), json!("B"), json!("C")]);
            }
            other => panic!("unexpected summary {other:?}"),
        }
    }

    #[test]
    fn serializes_type_tag() {
        let rows = records(json!([{"n": 1}]));
        let value = serde_json::to_value(basic_stats(&rows)).unwrap();
        assert_eq!(value["fields"]["n"]["type"], json!("numeric"));
        assert!(value.get("record_count").is_none());
    }
}
