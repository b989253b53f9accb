//! Language model boundary
//!
//! The pipeline only needs "text in, text out". [`LanguageModel`] is that
//! capability; [`OpenAiModel`] implements it over any OpenAI-compatible chat
//! completions endpoint (OpenAI itself, or a local Ollama server).

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model backend unreachable: {0}")]
    Unreachable(String),

    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Model returned no content")]
    EmptyResponse,
}

/// Text-in/text-out inference capability
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Identifier of the underlying model, for logs
    fn model_id(&self) -> &str;

    /// Complete a prompt. Callers apply their own deadline.
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

/// Chat-completions client for OpenAI-compatible servers
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiModel {
    pub fn new(api_base: &str, api_key: Option<&str>, model: impl Into<String>, temperature: f32) -> Self {
        let mut config = OpenAIConfig::new().with_api_base(api_base);
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }

        Self {
            client: Client::with_config(config),
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let messages = vec![ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(map_openai_error)?,
        )];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .build()
            .map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ModelError::EmptyResponse)?;

        tracing::trace!(model = %self.model, response = %content, "Model response");
        Ok(content)
    }
}

fn map_openai_error(error: OpenAIError) -> ModelError {
    match error {
        OpenAIError::Reqwest(e) => ModelError::Unreachable(e.to_string()),
        other => ModelError::Request(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Nothing listens on port 9 locally
        let model = OpenAiModel::new("http://127.0.0.1:9/v1", None, "llama3", 0.0);
        assert_eq!(model.model_id(), "llama3");

        let result = model.complete("SELECT 1").await;
        assert!(matches!(result, Err(ModelError::Unreachable(_))));
    }
}
