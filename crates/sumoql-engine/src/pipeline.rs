//! Question-to-answer pipeline
//!
//! ```text
//! Drafting -> Validating -> Executing -> Synthesizing -> answer
//!     ^           |
//!     +-- repair -+ (until max_attempts generation calls)
//! ```
//!
//! Only generation and validation are retried. Execution failures are final,
//! and synthesis failures degrade to the raw result table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};
use sumoql_duck::{ExecutionResult, QueryExecutor};
use sumoql_sql::{CandidateQuery, InvalidReason, SchemaDescriptor, ValidatedQuery, ValidationOutcome, Validator};
use tracing::Level;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::generate::{GenerationError, QueryGenerator};
use crate::llm::LanguageModel;
use crate::prompt::{PromptBuilder, PromptStyle, RepairContext};
use crate::synth::{no_data_answer, render_raw, AnswerSynthesizer};

/// Pipeline policy, built from configuration by the caller
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Total SQL generation calls per question, first draft included
    pub max_attempts: u32,
    pub generation_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub prompt_style: PromptStyle,
    pub context_notes: Vec<String>,
    pub summarize: bool,
    pub display_rows: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            generation_timeout: Duration::from_secs(60),
            synthesis_timeout: Duration::from_secs(60),
            prompt_style: PromptStyle::Instruct,
            context_notes: Vec::new(),
            summarize: true,
            display_rows: 50,
        }
    }
}

/// Per-request state
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub id: Uuid,
    pub question: String,
    /// Zero-based index of the next generation attempt
    pub attempt: u32,
    pub max_attempts: u32,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            attempt: 0,
            max_attempts,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Where the answer text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    /// Written by the answer model
    Synthesized,
    /// Empty result, fixed template
    NoData,
    /// Rendered result table (summarization off, or the answer model failed)
    RawFallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageTimings {
    /// Summed over all generation attempts
    pub generation: Duration,
    pub execution: Duration,
    pub synthesis: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalAnswer {
    pub request_id: Uuid,
    pub question: String,
    pub text: String,
    pub sql: String,
    pub result: ExecutionResult,
    pub source: AnswerSource,
    /// Generation calls used
    pub attempts: u32,
    pub timings: StageTimings,
}

impl FinalAnswer {
    /// SHA-256 over the deterministic part of the answer (not the request id
    /// or timings), hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.question, &self.text, &self.sql] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        for column in &self.result.columns {
            hasher.update(column.as_bytes());
            hasher.update([0u8]);
        }
        for row in &self.result.rows {
            hasher.update(serde_json::Value::Object(row.clone()).to_string().as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([self.result.truncated as u8]);

        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Why an attempt produced nothing executable
enum AttemptFailure {
    Rejected {
        candidate: CandidateQuery,
        reason: InvalidReason,
    },
    Model(GenerationError),
}

pub struct Pipeline {
    schema: Arc<SchemaDescriptor>,
    prompts: PromptBuilder,
    generator: QueryGenerator,
    validator: Validator,
    executor: QueryExecutor,
    synthesizer: AnswerSynthesizer,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        schema: Arc<SchemaDescriptor>,
        sql_model: Arc<dyn LanguageModel>,
        answer_model: Arc<dyn LanguageModel>,
        executor: QueryExecutor,
        config: PipelineConfig,
    ) -> Self {
        Self {
            prompts: PromptBuilder::new(config.prompt_style, config.context_notes.clone()),
            generator: QueryGenerator::new(sql_model, config.generation_timeout),
            validator: Validator::new(Arc::clone(&schema)),
            synthesizer: AnswerSynthesizer::new(answer_model, config.synthesis_timeout, config.display_rows),
            schema,
            executor,
            config,
        }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer one question end to end. Dropping the returned future cancels
    /// the in-flight model call or statement.
    #[tracing::instrument(skip(self), fields(request_id))]
    pub async fn answer(&self, question: &str) -> Result<FinalAnswer, PipelineError> {
        let started = Instant::now();
        let mut request = QueryRequest::new(question, self.config.max_attempts);
        tracing::Span::current().record("request_id", tracing::field::display(request.id));
        let mut timings = StageTimings::default();

        let query = self.draft(&mut request, &mut timings).await?;
        let attempts = request.attempt;

        let exec_started = Instant::now();
        let result = self
            .executor
            .execute(&query)
            .await
            .map_err(|source| PipelineError::Execution {
                sql: query.sql().to_string(),
                source,
            })?;
        timings.execution = exec_started.elapsed();

        crate::log_event!(
            level: Level::INFO,
            event: "query_executed",
            request_id: request.id,
            rows: result.row_count,
            truncated: result.truncated,
            duration_ms: timings.execution.as_millis()
        );

        let synth_started = Instant::now();
        let (text, source) = self.synthesize(&request, query.sql(), &result).await;
        timings.synthesis = synth_started.elapsed();
        timings.total = started.elapsed();

        crate::log_event!(
            level: Level::INFO,
            event: "answer_synthesized",
            request_id: request.id,
            source: source,
            generation_ms: timings.generation.as_millis(),
            execution_ms: timings.execution.as_millis(),
            synthesis_ms: timings.synthesis.as_millis(),
            total_ms: timings.total.as_millis()
        );

        Ok(FinalAnswer {
            request_id: request.id,
            question: request.question,
            text,
            sql: query.sql().to_string(),
            result,
            source,
            attempts,
            timings,
        })
    }

    /// Generate and validate until a query passes or attempts run out.
    /// On success `request.attempt` holds the number of generation calls made.
    async fn draft(
        &self,
        request: &mut QueryRequest,
        timings: &mut StageTimings,
    ) -> Result<ValidatedQuery, PipelineError> {
        // Last rejected candidate, fed back into the next prompt
        let mut repair: Option<(CandidateQuery, String)> = None;

        loop {
            let prompt = self.prompts.build(
                &self.schema,
                &request.question,
                repair.as_ref().map(|(candidate, reason)| RepairContext {
                    candidate,
                    reason: reason.as_str(),
                }),
            );

            let gen_started = Instant::now();
            let generated = self.generator.generate(&prompt, request.attempt).await;
            let gen_elapsed = gen_started.elapsed();
            timings.generation += gen_elapsed;

            let failure = match generated {
                Ok(candidate) => {
                    crate::log_event!(
                        level: Level::DEBUG,
                        event: "sql_generated",
                        request_id: request.id,
                        attempt: request.attempt,
                        sql: candidate.sql,
                        duration_ms: gen_elapsed.as_millis()
                    );

                    match self.validator.validate(&candidate) {
                        ValidationOutcome::Valid(query) => {
                            request.attempt += 1;
                            tracing::info!(attempt = query.attempt(), sql = %query.sql(), "Query accepted");
                            return Ok(query);
                        }
                        ValidationOutcome::Invalid(reason) => {
                            crate::log_event!(
                                level: Level::WARN,
                                event: "sql_rejected",
                                request_id: request.id,
                                attempt: request.attempt,
                                reason: reason.to_string()
                            );
                            AttemptFailure::Rejected { candidate, reason }
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(attempt = request.attempt, error = %error, "SQL generation failed");
                    AttemptFailure::Model(error)
                }
            };

            request.attempt += 1;

            if request.exhausted() {
                return Err(terminal_error(failure, request.attempt));
            }

            // A model failure retries the same prompt; a rejection asks for a fix
            if let AttemptFailure::Rejected { candidate, reason } = failure {
                repair = Some((candidate, reason.to_string()));
            }
        }
    }

    async fn synthesize(
        &self,
        request: &QueryRequest,
        sql: &str,
        result: &ExecutionResult,
    ) -> (String, AnswerSource) {
        // A truncated result had rows even when none were kept
        if result.is_empty() && !result.truncated {
            return (no_data_answer(&request.question), AnswerSource::NoData);
        }

        if !self.config.summarize {
            return (render_raw(result, self.config.display_rows), AnswerSource::RawFallback);
        }

        match self.synthesizer.synthesize(&request.question, sql, result).await {
            Ok(text) => (text, AnswerSource::Synthesized),
            Err(error) => {
                tracing::warn!(request_id = %request.id, error = %error, "Answer synthesis failed, returning raw rows");
                (render_raw(result, self.config.display_rows), AnswerSource::RawFallback)
            }
        }
    }
}

fn terminal_error(failure: AttemptFailure, attempts: u32) -> PipelineError {
    match failure {
        AttemptFailure::Rejected { candidate, reason } => PipelineError::ValidationFailed {
            attempts,
            reason,
            last_sql: if candidate.sql.is_empty() {
                candidate.raw_response
            } else {
                candidate.sql
            },
        },
        AttemptFailure::Model(GenerationError::Timeout(timeout)) => {
            PipelineError::GenerationTimeout { attempts, timeout }
        }
        AttemptFailure::Model(GenerationError::Model(source)) => PipelineError::Generation { attempts, source },
    }
}
