// Contracts with the language-model collaborators: prompt text out,
// free-form text back, validated before anything reaches the engine.

use crate::meta::DatasetMeta;
use crate::runtime::ExecOutput;
use crate::spec::{ChartSpec, ChartStyle};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    pub prompt: String,
    /// Ask the model for a single JSON document
    pub json_response: bool,
}

impl LlmRequest {
    pub fn text(prompt: String) -> Self {
        Self { prompt, json_response: false }
    }

    pub fn json(prompt: String) -> Self {
        Self { prompt, json_response: true }
    }
}

/// A completion backend. The crate ships no network client; callers plug
/// in their own.
pub trait LlmClient: Send + Sync {
    fn complete(&self, request: &LlmRequest) -> Result<String>;
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

pub fn question_prompt(meta: &DatasetMeta, count: usize) -> String {
    format!(
        "The number of GOALS to generate is {count}. The goals should be based on the data summary below.\n\n\
         {meta}\n\n\
         The generated goals should focus on the interests of a data analyst looking for \
         insightful, non-trivial questions about the data, while each question stays simple \
         enough for a beginner to understand.\n\n\
         Rules:\n\
         - Questions must be directly answerable from the dataset.\n\
         - Output pure JSON only: a list of strings. [\"Question 1\", \"Question 2\", ...]\n",
        count = count,
        meta = pretty(meta),
    )
}

pub fn chart_spec_prompt(meta: &DatasetMeta, question: &str) -> String {
    format!(
        "You are a data visualization assistant.\n\
         Given the dataset metadata and the user's question, generate a chart specification in JSON format.\n\n\
         Metadata:\n{meta}\n\n\
         User Question:\n\"{question}\"\n\n\
         Chart Spec Rules:\n\
         - Output JSON only.\n\
         - Must include keys: chart_type, x, y, aggregation, group_by, filters.\n\
         - filters must be a list of objects like {{\"column\":\"price\",\"op\":\">\",\"value\":100}}.\n\
         - chart_type must be one of: \"bar\", \"line\", \"scatter\", \"histogram\", \"pie\", \
           \"stacked_bar\", \"grouped_bar\", \"box\", \"area\".\n\
         - x must be a column from the dataset: {columns}.\n\
         - y must be a numeric column from the dataset.\n\
         - aggregation must be one of: \"sum\", \"mean\", \"count\", \"min\", \"max\", \"median\", \"none\".\n",
        meta = pretty(meta),
        question = question,
        columns = meta.column_names().join(", "),
    )
}

pub fn insight_prompt(
    meta: &DatasetMeta,
    spec: &ChartSpec,
    output: &ExecOutput,
    max_insights: usize,
    preview_rows: usize,
) -> String {
    format!(
        "You are a senior data analyst.\n\n\
         Here is the dataset metadata:\n\n{meta}\n\n\
         Here is the chart specification:\n\n{spec}\n\n\
         Here is the aggregated data used for the chart (as JSON rows, measure column \"{value_column}\"):\n\n{rows}\n\n\
         Please provide up to {max_insights} clear, concise insights about this chart and the \
         underlying data. Focus on patterns, comparisons, and notable highs/lows. \
         Write the answer in bullet points.\n",
        meta = pretty(meta),
        spec = pretty(&spec.to_json()),
        value_column = output.value_column,
        rows = pretty(&output.table.head(preview_rows).to_records()),
        max_insights = max_insights,
    )
}

pub fn style_prompt(
    meta: &DatasetMeta,
    question: &str,
    spec: &ChartSpec,
    output: &ExecOutput,
    preview_rows: usize,
) -> String {
    format!(
        "You are a professional data visualization designer.\n\n\
         Here is the dataset metadata:\n{meta}\n\n\
         The user selected this question:\n{question}\n\n\
         Here is the current chart specification:\n{spec}\n\n\
         Here is the aggregated data used for this chart (preview):\n{rows}\n\n\
         Please refine the chart design to make it clearer and more visually appealing.\n\n\
         Rules:\n\
         - Keep the existing structural fields: chart_type, x, y, aggregation, group_by, filters.\n\
         - Add a new field called \"style\" with properties such as:\n\
           - title: a clear, human-readable chart title\n\
           - subtitle: (optional) a short one-line explanation\n\
           - x_label: label for the x-axis\n\
           - y_label: label for the y-axis\n\
           - color_palette: a palette name (\"category10\", \"blues\", \"greens\", \"reds\")\n\
           - legend_position: e.g. \"top-right\", \"bottom\", or \"none\"\n\
           - annotations: a list of short text annotations for notable points (optional)\n\n\
         Return ONLY a single JSON object representing the refined chart spec.\n",
        meta = pretty(meta),
        question = question,
        spec = pretty(&spec.to_json()),
        rows = pretty(&output.table.head(preview_rows).to_records()),
    )
}

/// Drop a surrounding ```json ... ``` fence if the model added one
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Skip the language tag on the opening line
    match inner.find('\n') {
        Some(pos) if !inner[..pos].trim_start().starts_with(['{', '[']) => inner[pos + 1..].trim(),
        _ => inner.trim(),
    }
}

/// First balanced `{...}` in `text`, ignoring braces inside JSON strings
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_json_object(text: &str) -> Result<JsonValue> {
    let body = strip_code_fence(text);
    let candidate = extract_json_object(body).ok_or_else(|| anyhow!("No JSON object in model response"))?;
    serde_json::from_str(candidate).context("Model response is not valid JSON")
}

/// Questions from a model reply: a JSON list, an object holding the list,
/// or one question per line as a last resort.
pub fn parse_questions(text: &str) -> Vec<String> {
    let body = strip_code_fence(text);
    match serde_json::from_str::<JsonValue>(body) {
        Ok(JsonValue::Array(items)) => question_strings(&items),
        Ok(JsonValue::Object(map)) => {
            if let Some(items) = map.values().find_map(|v| v.as_array()) {
                question_strings(items)
            } else {
                map.values()
                    .next()
                    .and_then(|v| v.as_str())
                    .map(|s| vec![s.to_string()])
                    .unwrap_or_default()
            }
        }
        Ok(_) => Vec::new(),
        Err(_) => {
            debug!("Question reply is not JSON, splitting lines");
            body.lines()
                .map(strip_list_marker)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

fn question_strings(items: &[JsonValue]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::String(s) => Some(s.trim().to_string()),
            JsonValue::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|s| !s.is_empty())
        .collect()
}

// "1. ", "2) ", "- ", "* " prefixes
fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let rest = if digits > 0 {
        line[digits..].strip_prefix(['.', ')']).unwrap_or(line)
    } else {
        line.strip_prefix(['-', '*', '•']).unwrap_or(line)
    };
    rest.trim()
}

/// Extract and validate a chart spec from a model reply
pub fn parse_chart_spec(text: &str) -> Result<ChartSpec> {
    let value = parse_json_object(text)?;
    Ok(ChartSpec::from_json(&value)?)
}

/// Ask the model for presentation hints. Structural fields always come
/// from `spec`; only the returned `style` is taken.
pub fn refine_style(
    client: &dyn LlmClient,
    meta: &DatasetMeta,
    question: &str,
    spec: &ChartSpec,
    output: &ExecOutput,
    preview_rows: usize,
) -> Result<ChartSpec> {
    let prompt = style_prompt(meta, question, spec, output, preview_rows);
    let reply = client
        .complete(&LlmRequest::json(prompt))
        .context("Style refinement request failed")?;
    let value = parse_json_object(&reply)?;

    let mut refined = spec.clone();
    match value.get("style").and_then(ChartStyle::from_json) {
        Some(style) => refined.style = Some(style),
        None => warn!("Style reply carried no usable style object"),
    }
    Ok(refined)
}
