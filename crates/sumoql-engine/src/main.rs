//! SumoQL interactive shell
//!
//! Reads questions from stdin, answers them against the Sumobot DuckDB file.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sumoql_duck::{open_store, QueryExecutor, SchemaCatalog};
use sumoql_engine::{logging, Config, LanguageModel, OpenAiModel, Pipeline, PipelineError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const EXAMPLE_QUESTIONS: &[&str] = &[
    "How many matches are in the dataset?",
    "Which bot has won the most matches?",
    "What is the average match duration per arena?",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets (OPENAI_API_KEY) from .env
    dotenvy::dotenv().ok();

    let config_path = std::env::var("SUMOQL_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    logging::init(&config.logging);

    let conn = open_store(Path::new(&config.database.path))
        .with_context(|| format!("opening database {}", config.database.path))?;
    let catalog = SchemaCatalog::load(&conn, config.database.sample_values).context("loading schema catalog")?;
    let schema = catalog.describe();
    info!(tables = schema.tables.len(), path = %config.database.path, "Schema loaded");

    let api_key = Config::api_key();
    let sql_model: Arc<dyn LanguageModel> = Arc::new(OpenAiModel::new(
        &config.model.api_base,
        api_key.as_deref(),
        config.model.sql_model.clone(),
        config.model.temperature,
    ));
    let answer_model_id = config.model.effective_answer_model().to_string();
    let answer_model: Arc<dyn LanguageModel> = if answer_model_id == config.model.sql_model {
        Arc::clone(&sql_model)
    } else {
        Arc::new(OpenAiModel::new(
            &config.model.api_base,
            api_key.as_deref(),
            answer_model_id.clone(),
            config.model.temperature,
        ))
    };

    let pipeline = Pipeline::new(
        Arc::clone(&schema),
        sql_model,
        answer_model,
        QueryExecutor::new(conn, config.execution_limits()?),
        config.pipeline_config()?,
    );

    println!("SumoQL - ask questions about Sumobot games");
    println!("Database: {} ({} tables)", config.database.path, schema.tables.len());
    println!("SQL model: {}  Answer model: {}", config.model.sql_model, answer_model_id);
    println!("Try:");
    for question in EXAMPLE_QUESTIONS {
        println!("  - {question}");
    }
    println!("Type 'exit' to quit. Ctrl-C cancels a running question.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit" | "q") {
            break;
        }

        tokio::select! {
            outcome = pipeline.answer(question) => match outcome {
                Ok(answer) => {
                    println!("\nSQL: {}", answer.sql);
                    println!(
                        "(generation {} ms, execution {} ms, answer {} ms, total {} ms)",
                        answer.timings.generation.as_millis(),
                        answer.timings.execution.as_millis(),
                        answer.timings.synthesis.as_millis(),
                        answer.timings.total.as_millis(),
                    );
                    println!("\n>> Answer: {}\n", answer.text);
                }
                Err(error) => report(&error),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nCancelled.");
            }
        }
    }

    info!("Goodbye");
    Ok(())
}

fn print_prompt() {
    use std::io::Write;
    print!("\nAsk a question: ");
    std::io::stdout().flush().ok();
}

fn report(error: &PipelineError) {
    eprintln!("\nError: {error}");
    if let Some(sql) = error.sql() {
        eprintln!("SQL: {sql}");
    }
}
