//! SumoQL engine
//!
//! Natural-language questions in, answers out: builds schema-aware prompts,
//! asks a language model for SQL, validates and repairs it, runs it against
//! the DuckDB store, and phrases the result.

pub mod config;
pub mod error;
pub mod generate;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod prompt;
pub mod synth;

pub use config::{Config, ConfigError};
pub use error::PipelineError;
pub use generate::{GenerationError, QueryGenerator};
pub use llm::{LanguageModel, ModelError, OpenAiModel};
pub use pipeline::{AnswerSource, FinalAnswer, Pipeline, PipelineConfig, QueryRequest, StageTimings};
pub use prompt::{Prompt, PromptBuilder, PromptStyle};
pub use synth::{AnswerSynthesizer, SynthesisError};
