//! Dataset statistics: the light per-field summary every bundle carries and the
//! extended per-column analysis used by processed loads.

mod basic;
mod calculator;

use indexmap::IndexMap;

use crate::record::Record;

pub use basic::{basic_stats, BundleStats, FieldSummary};
pub use calculator::{
    ColumnKind, ColumnStats, DatasetStats, DateRange, NumericRange, RangeStats, StatsCalculator,
    ValueCount,
};

/// Union of record keys in first-seen order.
pub(crate) fn column_names(records: &[Record]) -> Vec<String> {
    let mut names: IndexMap<&str, ()> = IndexMap::new();
    for record in records {
        for key in record.keys() {
            names.entry(key.as_str()).or_insert(());
        }
    }
    names.keys().map(|name| name.to_string()).collect()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
