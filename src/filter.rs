use crate::data::{Table, Value};
use crate::spec::{Filter, FilterOp};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Apply predicates in order (logical AND). A predicate naming a column the
/// table does not have is skipped. Row order and columns are preserved.
pub fn apply_filters(table: &Table, filters: &[Filter]) -> Table {
    let mut active: Vec<(usize, &Filter)> = Vec::with_capacity(filters.len());
    for filter in filters {
        match table.column_index(&filter.column) {
            Some(idx) => active.push((idx, filter)),
            None => warn!(
                column = %filter.column,
                op = filter.op.as_str(),
                "Filter column not found, skipping predicate"
            ),
        }
    }

    let rows: Vec<Vec<Value>> = table
        .rows
        .iter()
        .filter(|row| active.iter().all(|(idx, f)| matches(&row[*idx], f.op, &f.value)))
        .cloned()
        .collect();

    debug!(before = table.len(), after = rows.len(), predicates = active.len(), "Applied filters");

    Table {
        columns: table.columns.clone(),
        rows,
    }
}

/// Evaluate one predicate. Non-comparable operands never match an
/// ordering operator.
pub fn matches(cell: &Value, op: FilterOp, target: &Value) -> bool {
    match op {
        FilterOp::Eq => cell.loosely_eq(target),
        FilterOp::Ne => !cell.loosely_eq(target),
        FilterOp::Gt => cell.compare(target) == Some(Ordering::Greater),
        FilterOp::Lt => cell.compare(target) == Some(Ordering::Less),
        FilterOp::Ge => matches!(cell.compare(target), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Le => matches!(cell.compare(target), Some(Ordering::Less | Ordering::Equal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    fn make_table() -> Table {
        Table::new(
            vec!["category".to_string(), "price".to_string()],
            vec![
                vec![s("A"), s("10")],
                vec![s("A"), s("20")],
                vec![s("B"), s("5")],
                vec![s("C"), Value::Null],
            ],
        )
    }

    fn filter(column: &str, op: FilterOp, value: Value) -> Filter {
        Filter {
            column: column.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_no_filters_is_identity() {
        let table = make_table();
        assert_eq!(apply_filters(&table, &[]), table);
    }

    #[test]
    fn test_numeric_string_against_number() {
        let table = make_table();
        let out = apply_filters(&table, &[filter("price", FilterOp::Gt, Value::Int(8))]);
        assert_eq!(out.len(), 2);
        assert!(out.rows.iter().all(|r| r[0] == s("A")));
    }

    #[test]
    fn test_filters_compose_with_and() {
        let table = make_table();
        let out = apply_filters(
            &table,
            &[
                filter("category", FilterOp::Eq, s("A")),
                filter("price", FilterOp::Le, Value::Int(10)),
            ],
        );
        assert_eq!(out.rows, vec![vec![s("A"), s("10")]]);
    }

    #[test]
    fn test_unknown_column_is_ignored() {
        let table = make_table();
        let with_bogus = apply_filters(
            &table,
            &[
                filter("category", FilterOp::Ne, s("A")),
                filter("hallucinated", FilterOp::Eq, Value::Int(1)),
            ],
        );
        let without = apply_filters(&table, &[filter("category", FilterOp::Ne, s("A"))]);
        assert_eq!(with_bogus, without);
        assert_eq!(with_bogus.len(), 2);
    }

    #[test]
    fn test_type_mismatch_matches_nothing() {
        let table = make_table();
        let out = apply_filters(&table, &[filter("category", FilterOp::Gt, Value::Int(1))]);
        assert!(out.is_empty());
        assert_eq!(out.columns, table.columns);
    }

    #[test]
    fn test_not_equal_keeps_missing() {
        let table = make_table();
        let out = apply_filters(&table, &[filter("price", FilterOp::Ne, s("10"))]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let table = make_table();
        let copy = table.clone();
        let _ = apply_filters(&table, &[filter("category", FilterOp::Eq, s("B"))]);
        assert_eq!(table, copy);
    }
}
