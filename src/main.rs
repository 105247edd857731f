use anyhow::{bail, Context, Result};
use chartspec::config::{EngineConfig, OutputFormat};
use chartspec::csv_reader;
use chartspec::data::Table;
use chartspec::meta::describe_dataset;
use chartspec::parser::parse_filter_expr;
use chartspec::resolve::resolve_value_column;
use chartspec::runtime::execute_and_render;
use chartspec::spec::ChartSpec;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "chartspec")]
#[command(about = "Execute LLM-produced chart specifications against CSV data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter, aggregate and optionally render a chart spec over CSV read from stdin
    Exec {
        /// Chart spec JSON file, or '-' for stdin (then --data is required)
        #[arg(long)]
        spec: String,
        /// CSV file to read instead of stdin
        #[arg(long)]
        data: Option<PathBuf>,
        /// Extra predicate ANDed onto the spec's filters (e.g. 'price > 100')
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Write the rendered chart here
        #[arg(long)]
        render: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Engine config JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print dataset metadata for CSV read from stdin
    Meta {
        #[arg(long, default_value = "uploaded_dataset")]
        name: String,
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Print the measure column a spec resolves to
    ValueColumn {
        #[arg(long)]
        spec: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Png,
    Svg,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Svg => OutputFormat::Svg,
        }
    }
}

fn main() -> Result<()> {
    // stdout carries JSON output; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chartspec=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Exec {
            spec,
            data,
            filters,
            render,
            format,
            width,
            height,
            config,
        } => {
            let mut config = match config {
                Some(path) => EngineConfig::from_path(&path)?,
                None => EngineConfig::default(),
            };
            if let Some(format) = format {
                config.render.format = format.into();
            }
            if let Some(width) = width {
                config.render.width = width;
            }
            if let Some(height) = height {
                config.render.height = height;
            }

            if spec == "-" && data.is_none() {
                bail!("--spec - reads the spec from stdin, so CSV must come from --data");
            }
            let mut chart_spec = read_spec(&spec)?;
            for expr in &filters {
                chart_spec.filters.push(parse_filter_expr(expr)?);
            }

            let table = read_table(data.as_deref())?;
            let rendered = execute_and_render(&table, &chart_spec, &config.render)
                .context("Failed to execute chart spec")?;

            if let Some(path) = render {
                match &rendered.image {
                    Ok(bytes) => {
                        std::fs::write(&path, bytes)
                            .with_context(|| format!("Failed to write chart to {}", path.display()))?;
                        info!(path = %path.display(), "Wrote chart");
                    }
                    Err(e) => warn!(error = %e, "Chart not written"),
                }
            }

            print_json(&rendered.output.to_json())
        }
        Command::Meta { name, data } => {
            let table = read_table(data.as_deref())?;
            let summary = describe_dataset(&name, &table);
            print_json(&serde_json::to_value(&summary).context("Failed to serialize metadata")?)
        }
        Command::ValueColumn { spec } => {
            let chart_spec = read_spec(&spec)?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{}", resolve_value_column(&chart_spec)).context("Failed to write to stdout")?;
            Ok(())
        }
    }
}

fn read_spec(source: &str) -> Result<ChartSpec> {
    let text = if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read spec from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read spec {}", source))?
    };
    Ok(ChartSpec::parse_json(&text)?)
}

fn read_table(path: Option<&Path>) -> Result<Table> {
    match path {
        Some(path) => csv_reader::read_csv_from_path(path),
        None => csv_reader::read_csv_from_stdin().context("Failed to read CSV from stdin"),
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, value).context("Failed to write JSON to stdout")?;
    writeln!(handle).context("Failed to write to stdout")?;
    handle.flush().context("Failed to flush stdout")?;
    Ok(())
}
