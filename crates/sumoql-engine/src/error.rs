use std::time::Duration;

use sumoql_duck::ExecutionError;
use sumoql_sql::InvalidReason;
use thiserror::Error;

use crate::llm::ModelError;

/// Terminal outcome of a request that produced no answer
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("SQL model timed out after {timeout:?} (attempt {attempts})")]
    GenerationTimeout { attempts: u32, timeout: Duration },

    #[error("SQL generation failed after {attempts} attempt(s): {source}")]
    Generation {
        attempts: u32,
        #[source]
        source: ModelError,
    },

    #[error("No valid query after {attempts} attempt(s): {reason}")]
    ValidationFailed {
        attempts: u32,
        reason: InvalidReason,
        /// Last candidate SQL, or the raw response when none could be extracted
        last_sql: String,
    },

    #[error("Query execution failed: {source}")]
    Execution {
        sql: String,
        #[source]
        source: ExecutionError,
    },
}

impl PipelineError {
    /// SQL involved in the failure, if any got that far
    pub fn sql(&self) -> Option<&str> {
        match self {
            PipelineError::ValidationFailed { last_sql, .. } => Some(last_sql),
            PipelineError::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}
