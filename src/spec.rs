// Chart specification: the validated form of the JSON object an LLM produces.

use crate::data::Value;
use crate::error::ExecError;
use serde_json::{json, Map, Value as JsonValue};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
    Histogram,
    Pie,
    StackedBar,
    GroupedBar,
    Box,
    Area,
    /// Kept verbatim so the data still executes; only rendering rejects it
    Other(String),
}

impl ChartType {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "bar" => ChartType::Bar,
            "line" => ChartType::Line,
            "scatter" => ChartType::Scatter,
            "histogram" | "hist" => ChartType::Histogram,
            "pie" => ChartType::Pie,
            "stacked_bar" => ChartType::StackedBar,
            "grouped_bar" => ChartType::GroupedBar,
            "box" | "boxplot" => ChartType::Box,
            "area" => ChartType::Area,
            _ => ChartType::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Scatter => "scatter",
            ChartType::Histogram => "histogram",
            ChartType::Pie => "pie",
            ChartType::StackedBar => "stacked_bar",
            ChartType::GroupedBar => "grouped_bar",
            ChartType::Box => "box",
            ChartType::Area => "area",
            ChartType::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    None,
    Sum,
    Mean,
    Count,
    Min,
    Max,
    Median,
}

impl Aggregation {
    /// Case-insensitive. Unknown non-empty tokens fall back to `Mean`;
    /// callers wanting strict validation should use [`Aggregation::parse_strict`].
    pub fn parse(token: &str) -> Self {
        match Self::parse_strict(token) {
            Some(agg) => agg,
            None => {
                warn!(token, "Unsupported aggregation, falling back to mean");
                Aggregation::Mean
            }
        }
    }

    pub fn parse_strict(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Aggregation::None),
            "sum" => Some(Aggregation::Sum),
            "mean" | "average" | "avg" => Some(Aggregation::Mean),
            "count" => Some(Aggregation::Count),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "median" => Some(Aggregation::Median),
            _ => None,
        }
    }

    /// Canonical lowercase token, the prefix of the value column name
    pub fn token(&self) -> &'static str {
        match self {
            Aggregation::None => "none",
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Median => "median",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Aggregation::Count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl FilterOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim() {
            "==" | "=" => Some(FilterOp::Eq),
            "!=" | "<>" => Some(FilterOp::Ne),
            ">" => Some(FilterOp::Gt),
            "<" => Some(FilterOp::Lt),
            ">=" => Some(FilterOp::Ge),
            "<=" => Some(FilterOp::Le),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Ge => ">=",
            FilterOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Presentation hints added by style refinement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartStyle {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub color_palette: Option<String>,
    pub legend_position: Option<String>,
    pub annotations: Vec<String>,
}

impl ChartStyle {
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            title: opt_str(obj, "title"),
            subtitle: opt_str(obj, "subtitle"),
            x_label: opt_str(obj, "x_label"),
            y_label: opt_str(obj, "y_label"),
            color_palette: opt_str(obj, "color_palette"),
            legend_position: opt_str(obj, "legend_position"),
            annotations: obj
                .get("annotations")
                .and_then(|a| a.as_array())
                .map(|items| items.iter().filter_map(annotation_text).collect())
                .unwrap_or_default(),
        })
    }

    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::new();
        let fields = [
            ("title", &self.title),
            ("subtitle", &self.subtitle),
            ("x_label", &self.x_label),
            ("y_label", &self.y_label),
            ("color_palette", &self.color_palette),
            ("legend_position", &self.legend_position),
        ];
        for (key, val) in fields {
            if let Some(v) = val {
                obj.insert(key.to_string(), JsonValue::String(v.clone()));
            }
        }
        if !self.annotations.is_empty() {
            obj.insert("annotations".to_string(), json!(self.annotations));
        }
        JsonValue::Object(obj)
    }
}

// Annotations come back either as plain strings or as {"text": ...} objects
fn annotation_text(item: &JsonValue) -> Option<String> {
    match item {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Object(o) => o.get("text").and_then(|t| t.as_str()).map(str::to_string),
        _ => None,
    }
}

/// Normalized chart specification. Built once from untrusted JSON, then
/// only read by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub x: String,
    pub y: String,
    pub aggregation: Aggregation,
    pub group_by: Option<String>,
    pub filters: Vec<Filter>,
    pub style: Option<ChartStyle>,
}

impl ChartSpec {
    pub fn new(chart_type: ChartType, x: &str, y: &str, aggregation: Aggregation) -> Self {
        Self {
            chart_type,
            x: x.to_string(),
            y: y.to_string(),
            aggregation,
            group_by: None,
            filters: Vec::new(),
            style: None,
        }
    }

    /// Validate an LLM-produced JSON object. Only a non-object input or
    /// missing `x`/`y` names are fatal; every other field degrades to a
    /// default.
    pub fn from_json(value: &JsonValue) -> Result<Self, ExecError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ExecError::InvalidSpec("chart spec must be a JSON object".to_string()))?;

        let x = required_column(obj, "x")?;
        let y = required_column(obj, "y")?;

        let chart_type = match opt_str(obj, "chart_type") {
            Some(name) => ChartType::parse(&name),
            None => ChartType::Bar,
        };

        let aggregation = match obj.get("aggregation") {
            Some(JsonValue::String(token)) => Aggregation::parse(token),
            Some(JsonValue::Null) | None => Aggregation::None,
            Some(other) => {
                warn!(%other, "Non-string aggregation, falling back to mean");
                Aggregation::Mean
            }
        };

        let group_by = opt_column(obj, "group_by");

        let filters = match obj.get("filters") {
            Some(JsonValue::Array(items)) => items.iter().filter_map(parse_filter).collect(),
            Some(JsonValue::Null) | None => Vec::new(),
            Some(other) => {
                warn!(%other, "Ignoring non-array filters");
                Vec::new()
            }
        };

        let style = obj.get("style").and_then(ChartStyle::from_json);

        Ok(Self {
            chart_type,
            x,
            y,
            aggregation,
            group_by,
            filters,
            style,
        })
    }

    pub fn parse_json(text: &str) -> Result<Self, ExecError> {
        let value: JsonValue = serde_json::from_str(text)
            .map_err(|e| ExecError::InvalidSpec(format!("not valid JSON: {}", e)))?;
        Self::from_json(&value)
    }

    /// Serialize back into the collaborator JSON shape
    pub fn to_json(&self) -> JsonValue {
        let filters: Vec<JsonValue> = self
            .filters
            .iter()
            .map(|f| json!({"column": f.column, "op": f.op.as_str(), "value": f.value.to_json()}))
            .collect();
        let mut obj = json!({
            "chart_type": self.chart_type.as_str(),
            "x": self.x,
            "y": self.y,
            "aggregation": self.aggregation.token(),
            "group_by": self.group_by,
            "filters": filters,
        });
        if let (Some(style), Some(map)) = (&self.style, obj.as_object_mut()) {
            map.insert("style".to_string(), style.to_json());
        }
        obj
    }
}

fn opt_str(obj: &Map<String, JsonValue>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Column names are kept verbatim so headers with surrounding spaces still match
fn opt_column(obj: &Map<String, JsonValue>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn required_column(obj: &Map<String, JsonValue>, key: &str) -> Result<String, ExecError> {
    opt_column(obj, key)
        .ok_or_else(|| ExecError::InvalidSpec(format!("'{}' must be a non-empty column name", key)))
}

fn parse_filter(item: &JsonValue) -> Option<Filter> {
    let obj = match item.as_object() {
        Some(o) => o,
        None => {
            warn!(%item, "Skipping filter that is not an object");
            return None;
        }
    };
    let column = opt_column(obj, "column");
    let op = obj
        .get("op")
        .or_else(|| obj.get("operator"))
        .and_then(|v| v.as_str())
        .and_then(FilterOp::parse);
    // Only an explicit JSON null compares against missing cells
    let value = obj.get("value").and_then(Value::from_json);

    match (column, op, value) {
        (Some(column), Some(op), Some(value)) => Some(Filter { column, op, value }),
        _ => {
            warn!(%item, "Skipping malformed filter");
            None
        }
    }
}
