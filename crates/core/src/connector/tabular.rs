use std::fs;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde_json::Value;

use crate::error::{DprocError, Result};
use crate::record::{number_value, Record};

pub fn load_csv(path: &Path) -> Result<Vec<Record>> {
    let file = fs::File::open(path)?;
    parse_csv_reader(path, file)
}

pub fn parse_csv_str(text: &str) -> Result<Vec<Record>> {
    parse_csv_reader(Path::new("<inline>"), text.as_bytes())
}

fn parse_csv_reader<R: Read>(path: &Path, reader: R) -> Result<Vec<Record>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = reader
        .headers()
        .map(|h| h.iter().map(|cell| cell.to_string()).collect::<Vec<_>>())
        .map_err(|err| DprocError::parse(path, format!("missing headers: {err}")))?;
    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|err| {
            DprocError::parse(path, format!("invalid row {}: {err}", idx + 1))
        })?;
        let mut record = Record::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            record.insert(header.clone(), cast_cell(cell));
        }
        records.push(record);
    }
    Ok(records)
}

/// Cells that are entirely numeric become numbers; the rest stay strings.
fn cast_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::String(String::new());
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::from(int);
    }
    let looks_numeric = cell
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if looks_numeric {
        if let Ok(float) = cell.parse::<f64>() {
            if float.is_finite() {
                return number_value(float);
            }
        }
    }
    Value::String(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn casts_numeric_cells() {
        let records = parse_csv_str("product,revenue,share\nWidget, 1500 ,0.25\nGadget,n/a,\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["product"], json!("Widget"));
        assert_eq!(records[0]["revenue"], json!(1500));
        assert_eq!(records[0]["share"], json!(0.25));
        assert_eq!(records[1]["revenue"], json!("n/a"));
        assert_eq!(records[1]["share"], json!(""));
    }

    #[test]
    fn keeps_header_order() {
        let records = parse_csv_str("z,a,m\n1,2,3\n").unwrap();
        let keys: Vec<_> = records[0].keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn ragged_rows_are_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b\n1,2\n3,4,5").unwrap();
        let err = load_csv(file.path()).unwrap_err();
        assert!(matches!(err, DprocError::Parse { .. }));
        assert!(err.to_string().contains("invalid row 2"));
    }

    #[test]
    fn header_only_file_has_no_records() {
        let records = parse_csv_str("a,b\n").unwrap();
        assert!(records.is_empty());
    }
}
