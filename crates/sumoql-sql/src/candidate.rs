//! Candidate queries produced by the model, before validation

use serde::{Deserialize, Serialize};

/// An unvalidated SQL statement extracted from a model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuery {
    /// Extracted SQL text (empty when `unparseable`)
    pub sql: String,

    /// Zero-based generation attempt that produced this candidate
    pub attempt: u32,

    /// Model output exactly as received, kept for diagnostics
    pub raw_response: String,

    /// No SQL-like content could be found in the response
    pub unparseable: bool,
}

impl CandidateQuery {
    /// Build a candidate from a raw model response.
    ///
    /// `response_prefix` is the text the prompt primed the model with (e.g.
    /// `SELECT` for completion-style prompts); it is prepended when the model
    /// continued from it instead of repeating it.
    pub fn from_response(raw_response: &str, attempt: u32, response_prefix: Option<&str>) -> Self {
        match crate::extract::extract_sql(raw_response, response_prefix) {
            Some(sql) => Self {
                sql,
                attempt,
                raw_response: raw_response.to_string(),
                unparseable: false,
            },
            None => Self::unparseable(raw_response, attempt),
        }
    }

    pub fn unparseable(raw_response: &str, attempt: u32) -> Self {
        Self {
            sql: String::new(),
            attempt,
            raw_response: raw_response.to_string(),
            unparseable: true,
        }
    }
}
