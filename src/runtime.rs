// Execution orchestrator: filter -> aggregate -> resolve -> (optional render)

use crate::aggregate::aggregate;
use crate::config::RenderOptions;
use crate::data::Table;
use crate::error::{ExecError, RenderError};
use crate::filter::apply_filters;
use crate::graph;
use crate::resolve::resolve_value_column;
use crate::spec::ChartSpec;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

/// Successful execution: the plottable table and the name of its measure column
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub table: Table,
    pub value_column: String,
}

impl ExecOutput {
    pub fn to_json(&self) -> JsonValue {
        json!({
            "value_column": self.value_column,
            "columns": self.table.columns,
            "rows": self.table.to_records(),
        })
    }
}

/// Run a validated spec against a table. The input table is never modified.
pub fn execute(table: &Table, spec: &ChartSpec) -> Result<ExecOutput, ExecError> {
    let filtered = apply_filters(table, &spec.filters);
    if filtered.is_empty() {
        return Err(ExecError::NoDataAfterFilter);
    }

    let aggregated = aggregate(&filtered, spec)?;

    let value_column = resolve_value_column(spec);
    if !aggregated.has_column(&value_column) {
        return Err(ExecError::ValueColumnMissing {
            column: value_column,
            available: aggregated.columns.clone(),
        });
    }

    debug!(
        rows = aggregated.len(),
        value_column = %value_column,
        chart_type = spec.chart_type.as_str(),
        "Executed chart spec"
    );

    Ok(ExecOutput {
        table: aggregated,
        value_column,
    })
}

/// Validate raw collaborator JSON, then execute it
pub fn execute_json(table: &Table, spec: &JsonValue) -> Result<ExecOutput, ExecError> {
    let spec = ChartSpec::from_json(spec)?;
    execute(table, &spec)
}

/// Data result plus the outcome of the rendering side effect
#[derive(Debug)]
pub struct RenderedExecution {
    pub output: ExecOutput,
    pub image: Result<Vec<u8>, RenderError>,
}

/// Execute, then render. A render failure is reported next to the data and
/// never replaces a successful execution.
pub fn execute_and_render(
    table: &Table,
    spec: &ChartSpec,
    options: &RenderOptions,
) -> Result<RenderedExecution, ExecError> {
    let output = execute(table, spec)?;
    let image = graph::render_chart(&output, spec, options);
    if let Err(e) = &image {
        warn!(error = %e, "Chart rendering failed; returning data only");
    }
    Ok(RenderedExecution { output, image })
}
