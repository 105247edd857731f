use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[serde(rename = "png")]
    #[default]
    Png,
    #[serde(rename = "svg")]
    Svg,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RenderOptions {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default, rename = "type")]
    pub format: OutputFormat,
}

fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            format: OutputFormat::Png,
        }
    }
}

/// Settings for the pipeline around the engine
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub render: RenderOptions,
    /// Result rows shown to the LLM in insight and style prompts
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
    #[serde(default = "default_max_insights")]
    pub max_insights: usize,
    #[serde(default = "default_question_count")]
    pub question_count: usize,
    /// In-flight executions for batch runs
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_preview_rows() -> usize { 20 }
fn default_max_insights() -> usize { 3 }
fn default_question_count() -> usize { 20 }
fn default_batch_concurrency() -> usize { 5 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render: RenderOptions::default(),
            preview_rows: default_preview_rows(),
            max_insights: default_max_insights(),
            question_count: default_question_count(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid engine config")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.render.width, 800);
        assert_eq!(config.batch_concurrency, 5);
    }

    #[test]
    fn test_partial_render_options() {
        let config = EngineConfig::from_json_str(r#"{"render": {"type": "svg", "width": 400}, "max_insights": 5}"#).unwrap();
        assert_eq!(config.render.format, OutputFormat::Svg);
        assert_eq!(config.render.width, 400);
        assert_eq!(config.render.height, 600);
        assert_eq!(config.max_insights, 5);
    }

    #[test]
    fn test_bad_config() {
        assert!(EngineConfig::from_json_str(r#"{"render": {"type": "gif"}}"#).is_err());
    }
}
