//! Answer synthesis
//!
//! Turns an [`ExecutionResult`] into prose with a second model call. Large
//! results are summarized per column instead of being pasted into the prompt.

use std::cmp::Ordering;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sumoql_duck::value::display;
use sumoql_duck::ExecutionResult;
use thiserror::Error;

use crate::llm::{LanguageModel, ModelError};

#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("Answer model did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Answer model failed: {0}")]
    Model(#[from] ModelError),

    #[error("Answer model returned blank text")]
    Blank,
}

/// Fixed answer for an empty result
pub fn no_data_answer(question: &str) -> String {
    format!("No matching data was found for: \"{question}\"")
}

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    display_rows: usize,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration, display_rows: usize) -> Self {
        Self {
            model,
            timeout,
            display_rows,
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn display_rows(&self) -> usize {
        self.display_rows
    }

    pub async fn synthesize(
        &self,
        question: &str,
        sql: &str,
        result: &ExecutionResult,
    ) -> Result<String, SynthesisError> {
        if result.is_empty() && !result.truncated {
            return Ok(no_data_answer(question));
        }

        let prompt = answer_prompt(question, sql, result, self.display_rows);
        let text = tokio::time::timeout(self.timeout, self.model.complete(&prompt))
            .await
            .map_err(|_| SynthesisError::Timeout(self.timeout))??;

        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::Blank);
        }
        Ok(text.to_string())
    }
}

/// Prompt for the answer model
pub fn answer_prompt(question: &str, sql: &str, result: &ExecutionResult, display_rows: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a helpful data assistant.\n");
    prompt.push_str(
        "Based on the user's question, the SQL query used, and the raw result, write a natural language answer.\n",
    );
    prompt.push_str("Do not repeat the SQL query. Just give the answer in a clear sentence.\n\n");
    let _ = writeln!(prompt, "Question: {question}");
    let _ = writeln!(prompt, "SQL Query: {sql}");
    let _ = writeln!(prompt, "Raw Result:\n{}", render_result(result, display_rows));
    prompt.push_str("Answer (in a natural, conversational sentence):");
    prompt
}

/// Textual form of a result: the full table when it fits in `display_rows`,
/// otherwise column statistics followed by the leading rows
pub fn render_result(result: &ExecutionResult, display_rows: usize) -> String {
    if result.row_count <= display_rows {
        let mut text = render_table(result, display_rows);
        if result.truncated {
            text.push_str("\n(result truncated at the row limit)");
        }
        return text;
    }

    let mut text = String::from("Column statistics:\n");
    text.push_str(&column_stats(result));
    text.push('\n');
    text.push_str(&render_table(result, display_rows));
    let _ = write!(
        text,
        "\n(showing first {} of {}{} rows)",
        display_rows,
        result.row_count,
        if result.truncated { "+" } else { "" }
    );
    text
}

/// Raw answer used when summarization is off or the answer model fails
pub fn render_raw(result: &ExecutionResult, display_rows: usize) -> String {
    let mut text = render_table(result, display_rows);
    if result.row_count > display_rows {
        let _ = write!(text, "\n(showing first {} of {} rows)", display_rows, result.row_count);
    }
    if result.truncated {
        text.push_str("\n(result truncated at the row limit)");
    }
    text
}

/// Pipe-separated table of up to `max_rows` rows
pub fn render_table(result: &ExecutionResult, max_rows: usize) -> String {
    let mut lines = Vec::with_capacity(result.rows.len().min(max_rows) + 1);
    lines.push(result.columns.join(" | "));

    for row in result.rows.iter().take(max_rows) {
        let cells: Vec<String> = result
            .columns
            .iter()
            .map(|col| row.get(col).map(display).unwrap_or_else(|| "NULL".to_string()))
            .collect();
        lines.push(cells.join(" | "));
    }

    lines.join("\n")
}

/// One line per column: count, min, max, and mean for numeric columns
pub fn column_stats(result: &ExecutionResult) -> String {
    let mut lines = Vec::with_capacity(result.columns.len());

    for col in &result.columns {
        let values: Vec<&Value> = result
            .rows
            .iter()
            .filter_map(|row| row.get(col))
            .filter(|v| !v.is_null())
            .collect();

        let mut line = format!("- {col}: count={}", values.len());

        let min = values.iter().copied().min_by(|a, b| compare(a, b));
        let max = values.iter().copied().max_by(|a, b| compare(a, b));
        if let (Some(min), Some(max)) = (min, max) {
            let _ = write!(line, ", min={}, max={}", display(min), display(max));
        }

        let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        if !numbers.is_empty() && numbers.len() == values.len() {
            let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
            let _ = write!(line, ", mean={mean:.2}");
        }

        lines.push(line);
    }

    lines.join("\n")
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => display(a).cmp(&display(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> ExecutionResult {
        let rows: Vec<Map<String, Value>> = rows
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .map(|c| c.to_string())
                    .zip(values)
                    .collect()
            })
            .collect();
        ExecutionResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count: rows.len(),
            rows,
            truncated: false,
            elapsed: Duration::from_millis(1),
        }
    }

    struct Counting {
        calls: AtomicUsize,
        reply: Result<String, ModelError>,
    }

    #[async_trait::async_trait]
    impl LanguageModel for Counting {
        fn model_id(&self) -> &str {
            "counting"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.reply.clone()
        }
    }

    fn counting(reply: Result<String, ModelError>) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            reply,
        })
    }

    #[test]
    fn test_render_table() {
        let r = result(
            &["name", "wins"],
            vec![vec![json!("Crusher"), json!(12)], vec![json!("Nudge"), Value::Null]],
        );
        assert_eq!(render_table(&r, 10), "name | wins\nCrusher | 12\nNudge | NULL");
        assert_eq!(render_table(&r, 1), "name | wins\nCrusher | 12");
    }

    #[test]
    fn test_column_stats() {
        let r = result(
            &["bot", "score"],
            vec![
                vec![json!("b"), json!(3)],
                vec![json!("a"), json!(1)],
                vec![json!("c"), Value::Null],
                vec![json!("d"), json!(8)],
            ],
        );
        let stats = column_stats(&r);
        assert_eq!(
            stats,
            "- bot: count=4, min=a, max=d\n- score: count=3, min=1, max=8, mean=4.00"
        );
    }

    #[test]
    fn test_large_result_uses_statistics() {
        let rows = (1..=120).map(|i| vec![json!(i)]).collect();
        let r = result(&["match_id"], rows);
        let text = render_result(&r, 50);

        assert!(text.starts_with("Column statistics:\n- match_id: count=120, min=1, max=120, mean=60.50"));
        assert!(text.ends_with("(showing first 50 of 120 rows)"));
        assert!(text.contains("\n50\n"));
        assert!(!text.contains("\n51\n"));
    }

    #[test]
    fn test_small_result_is_rendered_whole() {
        let r = result(&["count_star()"], vec![vec![json!(150)]]);
        assert_eq!(render_result(&r, 50), "count_star()\n150");
    }

    #[test]
    fn test_render_raw_notes_limits() {
        let rows = (0..60).map(|i| vec![json!(i)]).collect();
        let mut r = result(&["n"], rows);
        r.truncated = true;
        let text = render_raw(&r, 50);
        assert!(text.contains("(showing first 50 of 60 rows)"));
        assert!(text.ends_with("(result truncated at the row limit)"));
    }

    #[tokio::test]
    async fn test_empty_result_skips_model() {
        let model = counting(Ok("unused".to_string()));
        let synth = AnswerSynthesizer::new(model.clone(), Duration::from_secs(1), 50);
        let r = result(&["bot"], vec![]);

        let text = synth.synthesize("Who won on Mars?", "SELECT 1", &r).await.unwrap();
        assert_eq!(text, "No matching data was found for: \"Who won on Mars?\"");
        assert_eq!(model.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_truncated_empty_result_is_not_no_data() {
        let model = counting(Ok("Rows exist but none were kept.".to_string()));
        let synth = AnswerSynthesizer::new(model.clone(), Duration::from_secs(1), 50);
        let mut r = result(&["bot"], vec![]);
        r.truncated = true;

        let text = synth.synthesize("List bots", "SELECT name FROM bots", &r).await.unwrap();
        assert_eq!(text, "Rows exist but none were kept.");
        assert_eq!(model.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_synthesize_trims_answer() {
        let model = counting(Ok("  There are 150 matches.\n".to_string()));
        let synth = AnswerSynthesizer::new(model.clone(), Duration::from_secs(1), 50);
        let r = result(&["count_star()"], vec![vec![json!(150)]]);

        let text = synth
            .synthesize("How many matches?", "SELECT COUNT(*) FROM matches", &r)
            .await
            .unwrap();
        assert_eq!(text, "There are 150 matches.");
        assert_eq!(model.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_synthesize_errors() {
        let r = result(&["n"], vec![vec![json!(1)]]);

        let down = counting(Err(ModelError::Unreachable("refused".to_string())));
        let synth = AnswerSynthesizer::new(down, Duration::from_secs(1), 50);
        assert!(matches!(
            synth.synthesize("q", "SELECT 1", &r).await,
            Err(SynthesisError::Model(_))
        ));

        let blank = counting(Ok("   ".to_string()));
        let synth = AnswerSynthesizer::new(blank, Duration::from_secs(1), 50);
        assert!(matches!(
            synth.synthesize("q", "SELECT 1", &r).await,
            Err(SynthesisError::Blank)
        ));
    }
}
