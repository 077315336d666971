mod bundle;
mod connector;
mod context;
mod error;
mod formula;
pub mod normalize;
mod record;
mod schema;
mod stats;
pub mod structured;

pub use bundle::{
    Bundle, BundleLoader, BundleMetadata, ComputedField, CustomField, EnrichedBundle, Samples,
};
pub use connector::{load_csv, load_json, load_records, parse_csv_str, parse_json_str, DataFormat};
pub use context::{
    ContextManager, DEFAULT_CHUNK_OVERLAP, DEFAULT_CONTEXT_WINDOW, DEFAULT_FIT_RESERVE,
    OMISSION_MARKER, PARAGRAPH_OVERLAP, TRUNCATION_MARKER,
};
pub use error::{DprocError, Result};
pub use formula::{parse as parse_formula, Aggregation, Formula, FormulaEngine, FormulaValue};
pub use normalize::{AutoNormalizer, FieldRoute};
pub use record::{
    as_number, display_value, format_number, is_blank, number_value, parse_float, parse_float_str,
    Record,
};
pub use schema::{
    validate_records, FieldKind, FieldSchema, SchemaDescription, SchemaEntry, SchemaInferrer,
    SchemaRegistry, ValidationSummary, DEFAULT_SAMPLE_SIZE, DEFAULT_SCHEMA_CACHE,
};
pub use stats::{
    basic_stats, BundleStats, ColumnKind, ColumnStats, DatasetStats, DateRange, FieldSummary,
    NumericRange, RangeStats, StatsCalculator, ValueCount,
};
pub use structured::{
    extract_json, extract_key_value, extract_list, extract_numbered_items, extract_sections,
    extract_table, NumberedItem,
};
