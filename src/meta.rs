// Dataset metadata handed to the LLM collaborators

use crate::data::{Table, Value};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

const DATE_LIKE_KEYWORDS: [&str; 6] = ["date", "time", "day", "month", "year", "dt"];
const EXAMPLE_VALUES: usize = 3;
const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int,
    Float,
    Bool,
    Datetime,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub dtype: DType,
    pub nullable: bool,
    pub example_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<NumericSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetMeta {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnMeta>,
}

impl DatasetMeta {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub dataset_id: String,
    pub name: String,
    pub source_type: String,
    pub meta: DatasetMeta,
    pub data_sample: Vec<JsonValue>,
}

/// Logical type of a column. Null cells are ignored; a column with no
/// non-null cells is `String`.
pub fn infer_dtype(name: &str, values: &[&Value]) -> DType {
    let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        return DType::String;
    }

    if present.iter().all(|v| matches!(v, Value::Int(_))) {
        return DType::Int;
    }
    if present.iter().all(|v| matches!(v, Value::Int(_) | Value::Float(_))) {
        return DType::Float;
    }
    if present.iter().all(|v| matches!(v, Value::Bool(_))) {
        return DType::Bool;
    }

    // Only columns named like dates are tried, so "price" never becomes a date
    let lower = name.to_lowercase();
    if DATE_LIKE_KEYWORDS.iter().any(|k| lower.contains(k))
        && present
            .iter()
            .all(|v| matches!(v, Value::Str(s) if parses_as_datetime(s)))
    {
        return DType::Datetime;
    }

    DType::String
}

fn parses_as_datetime(s: &str) -> bool {
    let s = s.trim();
    if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return true;
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .any(|fmt| NaiveDateTime::parse_from_str(s, fmt).is_ok())
}

pub fn build_columns_meta(table: &Table) -> Vec<ColumnMeta> {
    table
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<&Value> = table.rows.iter().map(|row| &row[idx]).collect();
            let dtype = infer_dtype(name, &values);

            let summary = match dtype {
                DType::Int | DType::Float => numeric_summary(&values),
                _ => None,
            };

            ColumnMeta {
                name: name.clone(),
                dtype,
                nullable: values.iter().any(|v| v.is_null()),
                example_values: values
                    .iter()
                    .filter(|v| !v.is_null())
                    .take(EXAMPLE_VALUES)
                    .map(|v| v.to_string())
                    .collect(),
                summary,
            }
        })
        .collect()
}

fn numeric_summary(values: &[&Value]) -> Option<NumericSummary> {
    let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if nums.is_empty() {
        return None;
    }
    Some(NumericSummary {
        min: nums.iter().copied().fold(f64::INFINITY, f64::min),
        max: nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean: nums.iter().sum::<f64>() / nums.len() as f64,
    })
}

pub fn build_meta(table: &Table) -> DatasetMeta {
    DatasetMeta {
        row_count: table.len(),
        column_count: table.columns.len(),
        columns: build_columns_meta(table),
    }
}

/// Summarize a freshly uploaded table. The id is stable for the same name
/// and content.
pub fn describe_dataset(name: &str, table: &Table) -> DatasetSummary {
    DatasetSummary {
        dataset_id: dataset_id(name, table),
        name: name.to_string(),
        source_type: "csv_upload".to_string(),
        meta: build_meta(table),
        data_sample: table.head(SAMPLE_ROWS).to_records(),
    }
}

fn dataset_id(name: &str, table: &Table) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    for column in &table.columns {
        hasher.update(column.as_bytes());
        hasher.update([0x1f]);
    }
    for row in &table.rows {
        hasher.update([0x1e]);
        for cell in row {
            hasher.update(cell.to_json().to_string().as_bytes());
            hasher.update([0x1f]);
        }
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
