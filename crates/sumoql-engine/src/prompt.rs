//! Prompt construction for SQL generation

use std::fmt::Write;
use std::str::FromStr;

use sumoql_sql::{CandidateQuery, SchemaDescriptor};

/// Prompt layout, chosen per model family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Chat/instruction-tuned models
    Instruct,
    /// SQL-specialized completion models (duckdb-nsql, sqlcoder); the prompt
    /// ends mid-statement and the model continues it
    Completion,
}

impl PromptStyle {
    pub fn for_model(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        if id.contains("nsql") || id.contains("sqlcoder") {
            PromptStyle::Completion
        } else {
            PromptStyle::Instruct
        }
    }
}

impl FromStr for PromptStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instruct" => Ok(PromptStyle::Instruct),
            "completion" => Ok(PromptStyle::Completion),
            other => Err(format!("unknown prompt style: {other}")),
        }
    }
}

/// A rendered prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    /// Text the prompt primes the model with; the response continues it
    pub response_prefix: Option<String>,
}

/// The failed attempt a repair prompt asks the model to fix
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    pub candidate: &'a CandidateQuery,
    pub reason: &'a str,
}

const INSTRUCTIONS: &str = "\
Rules:
- Return exactly one read-only DuckDB SQL statement (SELECT or WITH ... SELECT).
- Never modify data: no INSERT, UPDATE, DELETE, DROP, ALTER or CREATE.
- Use only the tables and columns listed in the schema.
- Use single quotes for string literals.
- Return ONLY the SQL query, without explanations or markdown formatting.";

/// Builds SQL-generation prompts. Pure: identical inputs give identical text.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    style: PromptStyle,
    context_notes: Vec<String>,
}

impl PromptBuilder {
    pub fn new(style: PromptStyle, context_notes: Vec<String>) -> Self {
        Self {
            style,
            context_notes,
        }
    }

    pub fn style(&self) -> PromptStyle {
        self.style
    }

    pub fn build(
        &self,
        schema: &SchemaDescriptor,
        question: &str,
        repair: Option<RepairContext<'_>>,
    ) -> Prompt {
        match self.style {
            PromptStyle::Instruct => self.build_instruct(schema, question, repair),
            PromptStyle::Completion => self.build_completion(schema, question, repair),
        }
    }

    fn build_instruct(
        &self,
        schema: &SchemaDescriptor,
        question: &str,
        repair: Option<RepairContext<'_>>,
    ) -> Prompt {
        let mut text = String::new();
        text.push_str("You are an expert SQL data analyst.\n");
        text.push_str(
            "Given the following database schema, write a DuckDB SQL query to answer the user's question.\n\n",
        );
        text.push_str("Schema:\n");
        text.push_str(&render_schema(schema));
        text.push_str("\n\n");

        if !self.context_notes.is_empty() {
            text.push_str("Database Context:\n");
            for note in &self.context_notes {
                let _ = writeln!(text, "- {note}");
            }
            text.push('\n');
        }

        text.push_str(INSTRUCTIONS);
        text.push_str("\n\n");

        if let Some(repair) = repair {
            text.push_str("Your previous query was rejected.\n");
            let _ = writeln!(text, "Previous query:\n{}", failed_sql(repair.candidate));
            let _ = writeln!(text, "Error: {}", repair.reason);
            text.push_str("Write a corrected query that fixes this error.\n\n");
        }

        let _ = write!(text, "Question: {question}\nSQL Query:");

        Prompt {
            text,
            response_prefix: None,
        }
    }

    fn build_completion(
        &self,
        schema: &SchemaDescriptor,
        question: &str,
        repair: Option<RepairContext<'_>>,
    ) -> Prompt {
        let mut text = String::new();
        let _ = write!(
            text,
            "### Task\nGenerate a read-only DuckDB SQL query to answer the following question: {question}\n\n"
        );
        text.push_str("### Database Schema\n");
        text.push_str(&render_schema(schema));
        text.push_str("\n\n");

        if let Some(repair) = repair {
            text.push_str("### Rejected Query\n");
            let _ = writeln!(text, "{}", failed_sql(repair.candidate));
            let _ = writeln!(text, "-- rejected because: {}\n", repair.reason);
        }

        text.push_str("### SQL Query\nSELECT");

        Prompt {
            text,
            response_prefix: Some("SELECT".to_string()),
        }
    }
}

fn failed_sql(candidate: &CandidateQuery) -> &str {
    if candidate.unparseable {
        candidate.raw_response.trim()
    } else {
        &candidate.sql
    }
}

/// Compact schema rendering, one block per table
pub fn render_schema(schema: &SchemaDescriptor) -> String {
    let mut blocks = Vec::with_capacity(schema.tables.len());

    for table in &schema.tables {
        let mut header = format!("Table {}", table.name);
        if let Some(rows) = table.row_count {
            let _ = write!(header, " ({rows} rows)");
        }

        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|col| {
                let mut line = format!("  {} {}", col.name, col.data_type);
                if !col.nullable {
                    line.push_str(" NOT NULL");
                }
                if !col.sample_values.is_empty() {
                    let samples: Vec<String> = col.sample_values.iter().map(sample_literal).collect();
                    let _ = write!(line, " -- e.g. {}", samples.join(", "));
                }
                line
            })
            .collect();

        blocks.push(format!("{header}\n(\n{}\n)", columns.join(",\n")));
    }

    blocks.join("\n\n")
}

/// Longest sample string shown in a column comment, in characters
const MAX_SAMPLE_CHARS: usize = 40;

/// Sample value as a SQL literal that stays on its comment line
fn sample_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => {
            let mut text: String = s.chars().take(MAX_SAMPLE_CHARS).collect();
            if s.chars().count() > MAX_SAMPLE_CHARS {
                text.push_str("...");
            }
            let text = text.replace(['\n', '\r'], " ").replace('\'', "''");
            format!("'{text}'")
        }
        other => other.to_string(),
    }
}
