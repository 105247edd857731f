use crate::data::{Table, Value};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read a CSV document with a header row into a typed table
pub fn read_csv<R: Read>(reader: R) -> Result<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let columns: Vec<String> = rdr
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if columns.is_empty() {
        anyhow::bail!("CSV must contain a header row");
    }

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Failed to parse CSV record {}", line + 1))?;
        // Short records are padded with missing values, long ones truncated
        let row: Vec<Value> = (0..columns.len())
            .map(|i| record.get(i).map(parse_cell).unwrap_or(Value::Null))
            .collect();
        rows.push(row);
    }

    if rows.is_empty() {
        anyhow::bail!("CSV must contain at least one data row");
    }

    Ok(Table::new(columns, rows))
}

pub fn read_csv_from_stdin() -> Result<Table> {
    let stdin = io::stdin();
    read_csv(stdin.lock())
}

pub fn read_csv_from_path(path: &Path) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_csv(file).with_context(|| format!("Failed to read CSV from {}", path.display()))
}

/// Type a raw cell: missing markers, integers, floats, bools, then text
pub fn parse_cell(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("na") || s.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    if s.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::Str(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_csv_types() {
        let csv = "name,qty,price,active,note\nA,1,2.5,true,\nB,2,x,FALSE,NA\n";
        let table = read_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.columns, vec!["name", "qty", "price", "active", "note"]);
        assert_eq!(table.rows[0][1], Value::Int(1));
        assert_eq!(table.rows[0][2], Value::Float(2.5));
        assert_eq!(table.rows[0][3], Value::Bool(true));
        assert_eq!(table.rows[0][4], Value::Null);
        assert_eq!(table.rows[1][2], Value::Str("x".to_string()));
        assert_eq!(table.rows[1][3], Value::Bool(false));
        assert_eq!(table.rows[1][4], Value::Null);
    }

    #[test]
    fn test_read_csv_ragged_rows() {
        let csv = "a,b,c\n1,2\n3,4,5,6\n";
        let table = read_csv(csv.as_bytes()).unwrap();
        assert_eq!(table.rows[0], vec![Value::Int(1), Value::Int(2), Value::Null]);
        assert_eq!(table.rows[1].len(), 3);
    }

    #[test]
    fn test_read_csv_requires_rows() {
        let err = read_csv("x,y\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("at least one data row"));
    }

    #[test]
    fn test_nan_text_stays_text() {
        assert_eq!(parse_cell("inf"), Value::Str("inf".to_string()));
    }
}
