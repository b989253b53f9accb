//! Configuration system for SumoQL
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (database, model, limits, logging)
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values. The loaded
//! values are turned into explicit structs for the pipeline; nothing below
//! the binary reads the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use sumoql_duck::ExecutionLimits;
use thiserror::Error;

use crate::pipeline::PipelineConfig;
use crate::prompt::PromptStyle;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// DuckDB file produced by the setup step
    pub path: String,

    /// Distinct example values per column shown to the model
    pub sample_values: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "sumobot.duckdb".to_string(),
            sample_values: 3,
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible endpoint (Ollama serves one under /v1)
    pub api_base: String,

    /// Model used to write SQL
    pub sql_model: String,

    /// Model used to phrase answers; defaults to `sql_model`, or to
    /// `fallback_answer_model` when the SQL model is SQL-specialized
    pub answer_model: Option<String>,

    /// General-purpose model for answers when the SQL model can't write prose
    pub fallback_answer_model: String,

    /// Prompt layout: "instruct" or "completion"; detected from the model id
    /// when unset
    pub prompt_style: Option<String>,

    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:11434/v1".to_string(),
            sql_model: "llama3".to_string(),
            answer_model: None,
            fallback_answer_model: "gemma3:4b".to_string(),
            prompt_style: None,
            timeout_secs: 60,
            temperature: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn prompt_style(&self) -> Result<PromptStyle, ConfigError> {
        match self.prompt_style.as_deref() {
            None => Ok(PromptStyle::for_model(&self.sql_model)),
            Some(style) => style.parse().map_err(|_| ConfigError::InvalidValue {
                key: "model.prompt_style".to_string(),
                value: style.to_string(),
            }),
        }
    }

    /// The model that writes the natural-language answer
    pub fn effective_answer_model(&self) -> &str {
        match &self.answer_model {
            Some(model) => model,
            None if PromptStyle::for_model(&self.sql_model) == PromptStyle::Completion => {
                &self.fallback_answer_model
            }
            None => &self.sql_model,
        }
    }
}

/// Pipeline behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Total SQL generation attempts per question, repairs included
    pub max_attempts: u32,

    /// Ask the model to phrase the answer; otherwise return the raw table
    pub summarize: bool,

    /// Rows embedded verbatim in the answer prompt
    pub display_rows: usize,

    /// Extra domain hints rendered into the SQL prompt
    pub context_notes: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            summarize: true,
            display_rows: 50,
            context_notes: Vec::new(),
        }
    }
}

/// Execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub statement_timeout_secs: u64,
    pub max_rows: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            statement_timeout_secs: 30,
            max_rows: 1000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineSettings,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file means defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Config::default();
            config.apply_env_overrides()?;
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var("SUMOQL_DB_PATH") {
            self.database.path = path;
        }

        if let Ok(base) = std::env::var("SUMOQL_MODEL_API_BASE") {
            self.model.api_base = base;
        }
        if let Ok(model) = std::env::var("SUMOQL_SQL_MODEL") {
            self.model.sql_model = model;
        }
        if let Ok(model) = std::env::var("SUMOQL_ANSWER_MODEL") {
            self.model.answer_model = Some(model);
        }

        if let Ok(attempts) = std::env::var("SUMOQL_MAX_ATTEMPTS") {
            self.pipeline.max_attempts = parse_env("SUMOQL_MAX_ATTEMPTS", &attempts)?;
        }
        if let Ok(rows) = std::env::var("SUMOQL_MAX_ROWS") {
            self.execution.max_rows = parse_env("SUMOQL_MAX_ROWS", &rows)?;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.directory = dir;
        }

        Ok(())
    }

    /// Get the model API key from the environment. Local Ollama ignores it.
    pub fn api_key() -> Option<String> {
        std::env::var("OPENAI_API_KEY").ok()
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }

        let model_timeout = Duration::from_secs(self.model.timeout_secs);
        Ok(PipelineConfig {
            max_attempts: self.pipeline.max_attempts,
            generation_timeout: model_timeout,
            synthesis_timeout: model_timeout,
            prompt_style: self.model.prompt_style()?,
            context_notes: self.pipeline.context_notes.clone(),
            summarize: self.pipeline.summarize,
            display_rows: self.pipeline.display_rows,
        })
    }

    pub fn execution_limits(&self) -> Result<ExecutionLimits, ConfigError> {
        // A zero cap would turn every non-empty result into an empty one
        if self.execution.max_rows == 0 {
            return Err(ConfigError::InvalidValue {
                key: "execution.max_rows".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(ExecutionLimits {
            statement_timeout: Duration::from_secs(self.execution.statement_timeout_secs),
            max_rows: self.execution.max_rows,
            ..ExecutionLimits::default()
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, "sumobot.duckdb");
        assert_eq!(config.model.sql_model, "llama3");
        assert_eq!(config.model.api_base, "http://127.0.0.1:11434/v1");
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.display_rows, 50);
        assert_eq!(config.execution.max_rows, 1000);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "stdout");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
model:
  sql_model: "duckdb-nsql:7b"
execution:
  max_rows: 25
"#,
        )
        .unwrap();

        assert_eq!(config.model.sql_model, "duckdb-nsql:7b");
        assert_eq!(config.model.timeout_secs, 60);
        assert_eq!(config.execution.max_rows, 25);
        assert_eq!(config.execution.statement_timeout_secs, 30);
        assert_eq!(config.model.prompt_style().unwrap(), PromptStyle::Completion);
        assert_eq!(config.model.effective_answer_model(), "gemma3:4b");
    }

    #[test]
    fn test_answer_model_selection() {
        let mut model = ModelConfig::default();
        assert_eq!(model.effective_answer_model(), "llama3");

        model.answer_model = Some("mistral".to_string());
        assert_eq!(model.effective_answer_model(), "mistral");
    }

    #[test]
    fn test_pipeline_config_rejects_zero_attempts() {
        let mut config = Config::default();
        config.pipeline.max_attempts = 0;
        assert!(matches!(
            config.pipeline_config(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_execution_limits_reject_zero_rows() {
        let mut config: Config = serde_yaml::from_str("execution:\n  max_rows: 0\n").unwrap();
        assert!(matches!(
            config.execution_limits(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "execution.max_rows"
        ));

        config.execution.max_rows = 25;
        assert_eq!(config.execution_limits().unwrap().max_rows, 25);
    }

    #[test]
    fn test_invalid_prompt_style() {
        let mut config = Config::default();
        config.model.prompt_style = Some("haiku".to_string());
        assert!(config.pipeline_config().is_err());
    }

    #[test]
    fn test_env_var_override() {
        std::env::set_var("SUMOQL_MAX_ATTEMPTS", "5");
        std::env::set_var("SUMOQL_SQL_MODEL", "sqlcoder");

        let config_yaml = r#"
database:
  path: "game.duckdb"
pipeline:
  max_attempts: 2
"#;
        let temp_file = std::env::temp_dir().join("sumoql_test_config.yaml");
        std::fs::write(&temp_file, config_yaml).unwrap();

        let config = Config::load(&temp_file).unwrap();
        assert_eq!(config.database.path, "game.duckdb");
        assert_eq!(config.pipeline.max_attempts, 5); // Overridden
        assert_eq!(config.model.sql_model, "sqlcoder"); // Overridden

        std::env::remove_var("SUMOQL_MAX_ATTEMPTS");
        std::env::remove_var("SUMOQL_SQL_MODEL");
        std::fs::remove_file(temp_file).ok();
    }
}
