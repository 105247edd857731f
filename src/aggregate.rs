use crate::data::{Table, Value};
use crate::error::{ColumnRole, ExecError};
use crate::resolve::value_column_name;
use crate::spec::{Aggregation, ChartSpec};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Group key wrapper giving `Value` rows a total order
#[derive(Debug, Clone)]
struct GroupKey(Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

/// Group the filtered table and reduce `y` with the spec's aggregation.
///
/// `Aggregation::None` returns the table with `y` coerced to numeric and the
/// row count unchanged. Otherwise the result has one row per distinct
/// `[x, group_by?]` key, sorted ascending by key, plus a single measure
/// column named by [`value_column_name`].
pub fn aggregate(table: &Table, spec: &ChartSpec) -> Result<Table, ExecError> {
    let x_idx = table.column_index(&spec.x).ok_or_else(|| ExecError::MissingColumn {
        column: spec.x.clone(),
        role: ColumnRole::X,
    })?;
    let y_idx = table.column_index(&spec.y).ok_or_else(|| ExecError::MissingColumn {
        column: spec.y.clone(),
        role: ColumnRole::Y,
    })?;

    let agg = spec.aggregation;

    if agg == Aggregation::None {
        return Ok(coerce_column(table, y_idx));
    }

    let value_col = value_column_name(agg, &spec.y);
    if spec.x == value_col {
        return Err(ExecError::InvalidSpec(format!(
            "x column '{}' collides with the aggregated value column",
            spec.x
        )));
    }
    let group_cols = grouping_columns(table, spec, x_idx, &value_col);

    // Rows whose measure fails numeric coercion are dropped, except for count
    let mut groups: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
    let mut dropped = 0usize;
    for row in &table.rows {
        let key = GroupKey(group_cols.iter().map(|(idx, _)| row[*idx].clone()).collect());
        if agg.is_numeric() {
            match row[y_idx].as_f64() {
                Some(v) => groups.entry(key).or_default().push(v),
                None => dropped += 1,
            }
        } else {
            groups.entry(key).or_default().push(0.0);
        }
    }

    if dropped > 0 {
        debug!(column = %spec.y, dropped, "Dropped rows with non-numeric measure");
    }

    if groups.is_empty() {
        return Err(ExecError::NoNumericData {
            column: spec.y.clone(),
            aggregation: agg.token().to_string(),
        });
    }

    let mut columns: Vec<String> = group_cols.iter().map(|(_, name)| name.clone()).collect();
    columns.push(value_col);

    let rows = groups
        .into_iter()
        .map(|(key, values)| {
            let mut row = key.0;
            row.push(reduce(agg, &values));
            row
        })
        .collect::<Vec<_>>();

    debug!(groups = rows.len(), aggregation = agg.token(), "Aggregated");

    Ok(Table { columns, rows })
}

/// `[x]`, extended with `group_by` when it names another existing column
/// that does not clash with the value column
fn grouping_columns(table: &Table, spec: &ChartSpec, x_idx: usize, value_col: &str) -> Vec<(usize, String)> {
    let mut cols = vec![(x_idx, spec.x.clone())];
    if let Some(group_by) = &spec.group_by {
        if group_by == &spec.x {
            debug!(column = %group_by, "group_by equals x, ignoring");
        } else if group_by == value_col {
            warn!(column = %group_by, "group_by collides with the value column, ignoring");
        } else if let Some(idx) = table.column_index(group_by) {
            cols.push((idx, group_by.clone()));
        } else {
            warn!(column = %group_by, "group_by column not found, ignoring");
        }
    }
    cols
}

fn coerce_column(table: &Table, idx: usize) -> Table {
    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row[idx] = match row[idx].as_f64() {
                Some(v) => Value::Float(v),
                None => Value::Null,
            };
            row
        })
        .collect();
    Table {
        columns: table.columns.clone(),
        rows,
    }
}

fn reduce(agg: Aggregation, values: &[f64]) -> Value {
    let n = values.len();
    match agg {
        Aggregation::Count => Value::Int(n as i64),
        Aggregation::Sum => Value::Float(values.iter().sum()),
        Aggregation::Mean => Value::Float(values.iter().sum::<f64>() / n as f64),
        Aggregation::Min => Value::Float(values.iter().copied().fold(f64::INFINITY, f64::min)),
        Aggregation::Max => Value::Float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Aggregation::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            Value::Float(percentile(&sorted, 0.5))
        }
        // Ungrouped tables never reach here
        Aggregation::None => Value::Null,
    }
}

/// Linear interpolation between closest ranks; `sorted_data` must be sorted
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    let n = sorted_data.len();
    if n == 0 { return f64::NAN; }
    if n == 1 { return sorted_data[0]; }

    let rank = p * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = rank.ceil() as usize;

    if lower_idx == upper_idx {
        sorted_data[lower_idx]
    } else {
        let weight = rank - lower_idx as f64;
        sorted_data[lower_idx] * (1.0 - weight) + sorted_data[upper_idx] * weight
    }
}
