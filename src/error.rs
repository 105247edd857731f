use thiserror::Error;

/// Which field of the chart specification referenced a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    X,
    Y,
}

impl std::fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnRole::X => "x",
            ColumnRole::Y => "y",
        };
        write!(f, "{}", name)
    }
}

/// Coarse failure category, for callers that branch on the cause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingColumn,
    NoDataAfterFilter,
    NoNumericData,
    ValueColumnMissing,
    InvalidSpec,
}

/// Failure returned by the execution engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("Column '{column}' (used as {role}) not found in table")]
    MissingColumn { column: String, role: ColumnRole },

    #[error("No rows left after applying filters")]
    NoDataAfterFilter,

    #[error("Column '{column}' has no numeric values to {aggregation}")]
    NoNumericData { column: String, aggregation: String },

    #[error("Value column '{column}' not in result columns: {available:?}")]
    ValueColumnMissing { column: String, available: Vec<String> },

    #[error("Invalid chart spec: {0}")]
    InvalidSpec(String),
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::MissingColumn { .. } => ErrorKind::MissingColumn,
            ExecError::NoDataAfterFilter => ErrorKind::NoDataAfterFilter,
            ExecError::NoNumericData { .. } => ErrorKind::NoNumericData,
            ExecError::ValueColumnMissing { .. } => ErrorKind::ValueColumnMissing,
            ExecError::InvalidSpec(_) => ErrorKind::InvalidSpec,
        }
    }
}

/// Failure of the optional rendering step
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Unsupported chart type: {0}")]
    UnsupportedChartType(String),

    #[error("Cannot render a chart with no plottable data")]
    EmptyData,

    #[error("Rendering failed: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_message() {
        let err = ExecError::MissingColumn {
            column: "price".to_string(),
            role: ColumnRole::Y,
        };
        assert_eq!(err.kind(), ErrorKind::MissingColumn);
        assert_eq!(err.to_string(), "Column 'price' (used as y) not found in table");
    }

    #[test]
    fn test_kinds_are_distinct() {
        assert_eq!(ExecError::NoDataAfterFilter.kind(), ErrorKind::NoDataAfterFilter);
        let err = ExecError::NoNumericData {
            column: "price".to_string(),
            aggregation: "sum".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NoNumericData);
        assert!(err.to_string().contains("sum"));
    }
}
