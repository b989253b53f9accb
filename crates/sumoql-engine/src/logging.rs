//! Structured logging for SumoQL
//!
//! Features:
//! - Human-readable console logging for interactive use
//! - Structured JSON logging for batch runs
//! - File rotation with daily log files
//! - Per-request stage events via [`log_event!`](crate::log_event)

use std::str::FromStr;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "sumoql.log";

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format (structured logging)
    Json,
    /// Compact single-line format
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Log to stdout only
    Stdout,
    /// Log to file only
    File,
    /// Log to both stdout and file
    Both,
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            other => Err(format!("unknown log output: {other}")),
        }
    }
}

/// Initialize the logging system.
///
/// Unknown format/output values fall back to pretty/stdout. `level` accepts
/// any `EnvFilter` directive, e.g. `info` or `sumoql_engine=debug,warn`.
pub fn init(config: &LoggingConfig) {
    let format = config.format.parse().unwrap_or(LogFormat::Pretty);
    let output = config.output.parse().unwrap_or(LogOutput::Stdout);

    let env_filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| EnvFilter::new("info"))
        // Filter out noisy third-party crates
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("reqwest=warn".parse().expect("static directive"))
        .add_directive("h2=warn".parse().expect("static directive"));

    let stdout_layer = match format {
        LogFormat::Pretty => fmt::layer().pretty().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    match output {
        LogOutput::Stdout => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();
        }
        LogOutput::File => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer(&config.directory))
                .init();
        }
        LogOutput::Both => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer(&config.directory))
                .init();
        }
    }

    tracing::debug!(
        format = ?format,
        output = ?output,
        level = %config.level,
        "Logging system initialized"
    );
}

fn file_layer<S>(directory: &str) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    std::fs::create_dir_all(directory).ok();
    let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, LOG_FILE_PREFIX);

    fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .boxed()
}

/// Helper macro for logging with structured fields
///
/// Usage:
/// ```rust
/// sumoql_engine::log_event!(
///     level: tracing::Level::INFO,
///     event: "query_executed",
///     request_id: "abc123",
///     duration_ms: 42,
///     rows: 100
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    (level: $level:expr, event: $event:expr $(, $key:ident: $value:expr)* $(,)?) => {
        tracing::event!(
            $level,
            event = $event
            $(, $key = ?$value)*
        );
    };
}
