// End-to-end analysis: metadata -> questions -> chart spec -> execution -> insights

use crate::config::EngineConfig;
use crate::data::Table;
use crate::error::ExecError;
use crate::llm::{self, LlmClient, LlmRequest};
use crate::meta::{DatasetMeta, DatasetSummary};
use crate::runtime::{execute, ExecOutput};
use crate::spec::ChartSpec;
use anyhow::{anyhow, bail, Context, Result};
use rayon::prelude::*;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

pub fn suggest_questions(client: &dyn LlmClient, meta: &DatasetMeta, count: usize) -> Result<Vec<String>> {
    let reply = client
        .complete(&LlmRequest::json(llm::question_prompt(meta, count)))
        .context("Question generation request failed")?;
    let questions = llm::parse_questions(&reply);
    if questions.is_empty() {
        bail!("Model returned no questions");
    }
    debug!(count = questions.len(), "Parsed suggested questions");
    Ok(questions)
}

pub fn generate_chart_spec(client: &dyn LlmClient, meta: &DatasetMeta, question: &str) -> Result<ChartSpec> {
    let reply = client
        .complete(&LlmRequest::json(llm::chart_spec_prompt(meta, question)))
        .context("Chart spec request failed")?;
    llm::parse_chart_spec(&reply).with_context(|| format!("Unusable chart spec for question: {}", question))
}

pub fn generate_insights(
    client: &dyn LlmClient,
    meta: &DatasetMeta,
    spec: &ChartSpec,
    output: &ExecOutput,
    config: &EngineConfig,
) -> Result<String> {
    let prompt = llm::insight_prompt(meta, spec, output, config.max_insights, config.preview_rows);
    client
        .complete(&LlmRequest::text(prompt))
        .context("Insight request failed")
}

/// Every intermediate product of one analysis run
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub dataset: DatasetSummary,
    pub questions: Vec<String>,
    pub chosen_question: String,
    pub chart_spec: ChartSpec,
    pub output: ExecOutput,
    pub insights: String,
}

impl AnalysisReport {
    pub fn to_json(&self) -> JsonValue {
        json!({
            "dataset": self.dataset,
            "questions": self.questions,
            "chosen_question": self.chosen_question,
            "chart_spec": self.chart_spec.to_json(),
            "result": self.output.to_json(),
            "insights": self.insights,
        })
    }
}

/// Run the whole chain for the `question_index`-th suggested question (1-based)
pub fn run_analysis(
    table: &Table,
    dataset: &DatasetSummary,
    question_index: usize,
    client: &dyn LlmClient,
    config: &EngineConfig,
) -> Result<AnalysisReport> {
    let meta = &dataset.meta;
    let questions = suggest_questions(client, meta, config.question_count)?;

    let chosen_question = question_index
        .checked_sub(1)
        .and_then(|i| questions.get(i))
        .cloned()
        .ok_or_else(|| {
            anyhow!(
                "Question index {} out of range (1..={})",
                question_index,
                questions.len()
            )
        })?;
    info!(question = %chosen_question, "Selected question");

    let chart_spec = generate_chart_spec(client, meta, &chosen_question)?;
    let output = execute(table, &chart_spec).context("Chart spec execution failed")?;
    let insights = generate_insights(client, meta, &chart_spec, &output, config)?;

    Ok(AnalysisReport {
        dataset: dataset.clone(),
        questions,
        chosen_question,
        chart_spec,
        output,
        insights,
    })
}

fn batch_pool(concurrency: usize) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new().num_threads(concurrency.max(1)).build()
}

/// Execute independent specs against one table on a pool of at most
/// `concurrency` threads. Results line up with `specs`.
pub fn execute_batch(table: &Table, specs: &[ChartSpec], concurrency: usize) -> Vec<Result<ExecOutput, ExecError>> {
    match batch_pool(concurrency) {
        Ok(pool) => pool.install(|| specs.par_iter().map(|spec| execute(table, spec)).collect()),
        Err(e) => {
            warn!(error = %e, "Could not start batch pool, executing sequentially");
            specs.iter().map(|spec| execute(table, spec)).collect()
        }
    }
}

/// [`execute_batch`] sized by `config.batch_concurrency`
pub fn run_batch(table: &Table, specs: &[ChartSpec], config: &EngineConfig) -> Vec<Result<ExecOutput, ExecError>> {
    debug!(specs = specs.len(), concurrency = config.batch_concurrency, "Running batch");
    execute_batch(table, specs, config.batch_concurrency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::error::ErrorKind;
    use crate::meta::describe_dataset;
    use crate::spec::{Aggregation, ChartType};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies in order and records the prompts it saw
    struct ScriptedClient {
        replies: Mutex<VecDeque<String>>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedClient {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LlmClient for ScriptedClient {
        fn complete(&self, request: &LlmRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    fn s(v: &str) -> Value {
        Value::Str(v.to_string())
    }

    fn table() -> Table {
        Table::new(
            vec!["category".to_string(), "price".to_string()],
            vec![
                vec![s("A"), Value::Int(10)],
                vec![s("A"), Value::Int(20)],
                vec![s("B"), Value::Int(5)],
            ],
        )
    }

    const QUESTIONS: &str = r#"{"questions": ["Which category is priciest?", "How many items per category?"]}"#;
    const SPEC: &str = r#"{"chart_type": "bar", "x": "category", "y": "price", "aggregation": "count", "group_by": null, "filters": []}"#;

    #[test]
    fn test_run_analysis_end_to_end() {
        let client = ScriptedClient::new(&[QUESTIONS, SPEC, "- A has the most items"]);
        let table = table();
        let dataset = describe_dataset("items", &table);
        let report = run_analysis(&table, &dataset, 2, &client, &EngineConfig::default()).unwrap();

        assert_eq!(report.chosen_question, "How many items per category?");
        assert_eq!(report.output.value_column, "count_price");
        assert_eq!(report.insights, "- A has the most items");

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].json_response);
        assert!(seen[1].prompt.contains("How many items per category?"));
        assert!(!seen[2].json_response);
        assert!(seen[2].prompt.contains("count_price"));
    }

    #[test]
    fn test_question_index_out_of_range() {
        let table = table();
        let dataset = describe_dataset("items", &table);
        for index in [0, 3] {
            let client = ScriptedClient::new(&[QUESTIONS]);
            let err = run_analysis(&table, &dataset, index, &client, &EngineConfig::default()).unwrap_err();
            assert!(err.to_string().contains("out of range"));
        }
    }

    #[test]
    fn test_execution_failure_surfaces() {
        let bad_spec = r#"{"chart_type": "bar", "x": "category", "y": "nonexistent", "aggregation": "sum"}"#;
        let client = ScriptedClient::new(&[QUESTIONS, bad_spec]);
        let table = table();
        let dataset = describe_dataset("items", &table);
        let err = run_analysis(&table, &dataset, 1, &client, &EngineConfig::default()).unwrap_err();
        let exec = err.downcast_ref::<ExecError>().unwrap();
        assert_eq!(exec.kind(), ErrorKind::MissingColumn);
    }

    #[test]
    fn test_execute_batch_keeps_order() {
        let table = table();
        let specs = vec![
            ChartSpec::new(ChartType::Bar, "category", "price", Aggregation::Sum),
            ChartSpec::new(ChartType::Bar, "category", "missing", Aggregation::Sum),
            ChartSpec::new(ChartType::Bar, "category", "price", Aggregation::Max),
        ];
        let results = execute_batch(&table, &specs, 2);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().value_column, "sum_price");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().value_column, "max_price");
    }

    #[test]
    fn test_run_batch_uses_configured_concurrency() {
        let config = EngineConfig::from_json_str(r#"{"batch_concurrency": 3}"#).unwrap();
        assert_eq!(batch_pool(config.batch_concurrency).unwrap().current_num_threads(), 3);
        assert_eq!(batch_pool(0).unwrap().current_num_threads(), 1);

        let table = table();
        let specs = vec![
            ChartSpec::new(ChartType::Bar, "category", "price", Aggregation::Min),
            ChartSpec::new(ChartType::Bar, "category", "price", Aggregation::Count),
        ];
        let results = run_batch(&table, &specs, &config);
        assert_eq!(results, execute_batch(&table, &specs, 1));
        assert_eq!(results[1].as_ref().unwrap().value_column, "count_price");
    }

    #[test]
    fn test_execute_batch_matches_sequential() {
        let table = table();
        let specs: Vec<ChartSpec> = [Aggregation::Mean, Aggregation::Count, Aggregation::Median]
            .into_iter()
            .map(|agg| ChartSpec::new(ChartType::Bar, "category", "price", agg))
            .collect();
        let parallel = execute_batch(&table, &specs, 0);
        let sequential: Vec<_> = specs.iter().map(|sp| execute(&table, sp)).collect();
        assert_eq!(parallel, sequential);
    }
}
