//! Query generation: prompt in, candidate SQL out

use std::sync::Arc;
use std::time::Duration;

use sumoql_sql::CandidateQuery;
use thiserror::Error;

use crate::llm::{LanguageModel, ModelError};
use crate::prompt::Prompt;

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Model did not respond within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Asks the SQL model for a statement and extracts it from the response
pub struct QueryGenerator {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl QueryGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// One model call. A response with no SQL in it is not an error here;
    /// it comes back as an `unparseable` candidate for the validator to reject.
    pub async fn generate(&self, prompt: &Prompt, attempt: u32) -> Result<CandidateQuery, GenerationError> {
        tracing::debug!(
            model = %self.model.model_id(),
            attempt,
            prompt_chars = prompt.text.len(),
            "Requesting SQL"
        );

        let raw = tokio::time::timeout(self.timeout, self.model.complete(&prompt.text))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))??;

        let candidate = CandidateQuery::from_response(&raw, attempt, prompt.response_prefix.as_deref());
        if candidate.unparseable {
            tracing::warn!(attempt, response = %raw, "No SQL found in model response");
        }

        Ok(candidate)
    }
}
