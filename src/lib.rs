// Library exports for chartspec

pub mod csv_reader;
pub mod data;
pub mod error;
pub mod graph;
pub mod parser;
pub mod runtime;
pub mod spec;

// Execution stages
pub mod aggregate;
pub mod filter;
pub mod resolve;

// Around the engine
pub mod cache;
pub mod config;
pub mod llm;
pub mod meta;
pub mod pipeline;

pub use config::{EngineConfig, OutputFormat, RenderOptions};
pub use data::{Table, Value};
pub use error::{ColumnRole, ErrorKind, ExecError, RenderError};
pub use runtime::{execute, execute_and_render, execute_json, ExecOutput};
pub use spec::{Aggregation, ChartSpec, ChartType, Filter, FilterOp};
