//! Executor - runs validated queries
//!
//! Manages:
//! - the shared DuckDB connection
//! - resource limits (statement timeout, row cap)
//! - query interrupts on timeout or cancellation
//! - result shaping

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use duckdb::{Connection, InterruptHandle};
use serde::Serialize;
use serde_json::{Map, Value};
use sumoql_sql::ValidatedQuery;
use thiserror::Error;

use crate::value;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution task failed: {0}")]
    Task(String),
}

/// Resource limits applied to every statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub statement_timeout: Duration,
    pub max_rows: usize,
    /// How long to wait for an interrupted statement to unwind
    pub interrupt_grace: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(30),
            max_rows: 1000,
            interrupt_grace: Duration::from_secs(2),
        }
    }
}

/// Rows returned by one statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    /// More rows existed than the row cap allowed
    pub truncated: bool,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell lookup by row index and column name
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }
}

/// Runs validated statements against a single DuckDB connection
pub struct QueryExecutor {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    limits: ExecutionLimits,
}

impl QueryExecutor {
    pub fn new(conn: Connection, limits: ExecutionLimits) -> Self {
        let interrupt = conn.interrupt_handle();
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            limits,
        }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Execute a validated query under the statement timeout and row cap.
    ///
    /// The statement runs on the blocking pool inside a transaction that is
    /// always rolled back. If the timeout fires, or the returned future is
    /// dropped before completion, the running statement is interrupted.
    pub async fn execute(&self, query: &ValidatedQuery) -> Result<ExecutionResult, ExecutionError> {
        let sql = query.sql().to_string();
        let conn = Arc::clone(&self.conn);
        let max_rows = self.limits.max_rows;

        let mut guard = InterruptOnDrop::new(Arc::clone(&self.interrupt));
        let mut task = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| ExecutionError::Task("connection lock poisoned".to_string()))?;
            run_read_only(&conn, &sql, max_rows)
        });

        match tokio::time::timeout(self.limits.statement_timeout, &mut task).await {
            Ok(joined) => {
                guard.disarm();
                let result = joined.map_err(|e| ExecutionError::Task(e.to_string()))??;
                tracing::debug!(
                    rows = result.row_count,
                    truncated = result.truncated,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Statement finished"
                );
                Ok(result)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.limits.statement_timeout.as_millis() as u64,
                    "Statement timed out, interrupting"
                );
                self.interrupt.interrupt();
                guard.disarm();
                if tokio::time::timeout(self.limits.interrupt_grace, task).await.is_err() {
                    tracing::warn!("Interrupted statement still running after grace period");
                }
                Err(ExecutionError::Timeout(self.limits.statement_timeout))
            }
        }
    }
}

/// Interrupts the connection if the owning future is dropped mid-statement
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    armed: bool,
}

impl InterruptOnDrop {
    fn new(handle: Arc<InterruptHandle>) -> Self {
        Self {
            handle,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            tracing::info!("Query cancelled, interrupting statement");
            self.handle.interrupt();
        }
    }
}

/// Run one statement inside a transaction that is never committed
fn run_read_only(
    conn: &Connection,
    sql: &str,
    max_rows: usize,
) -> Result<ExecutionResult, ExecutionError> {
    let started = Instant::now();

    conn.execute_batch("BEGIN TRANSACTION")?;
    let fetched = fetch_rows(conn, sql, max_rows);
    if let Err(e) = conn.execute_batch("ROLLBACK") {
        tracing::warn!(error = %e, "Rollback after read failed");
    }
    let (columns, rows, truncated) = fetched?;

    Ok(ExecutionResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
        elapsed: started.elapsed(),
    })
}

type Fetched = (Vec<String>, Vec<Map<String, Value>>, bool);

fn fetch_rows(conn: &Connection, sql: &str, max_rows: usize) -> Result<Fetched, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;

    let mut rows = stmt.query([])?;
    let columns = unique_columns(
        rows.as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default(),
    );

    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() == max_rows {
            truncated = true;
            break;
        }
        let mut record = Map::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), value::to_json(row.get_ref(idx)?));
        }
        out.push(record);
    }

    Ok((columns, out, truncated))
}

/// Rows are keyed by column name, so repeated output names (`l.name, r.name`)
/// get a numeric suffix: `name`, `name_1`, ...
fn unique_columns(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .map(|name| {
            let mut unique = name.clone();
            let mut suffix = 1;
            while !seen.insert(unique.clone()) {
                unique = format!("{name}_{suffix}");
                suffix += 1;
            }
            unique
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE bots (bot_id INTEGER, name VARCHAR);
             INSERT INTO bots VALUES (1, 'Bot_01'), (2, 'Bot_02');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_writes_are_rolled_back() {
        let conn = seeded();

        let result = run_read_only(&conn, "DELETE FROM bots", 10);
        assert!(result.is_ok());

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM bots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 2);
    }

    #[test]
    fn test_unique_columns() {
        let names = ["name", "name", "bot_id", "name_1", "name"].map(String::from).to_vec();
        assert_eq!(
            unique_columns(names),
            vec!["name", "name_1", "bot_id", "name_1_1", "name_2"]
        );
    }

    #[test]
    fn test_same_named_columns_keep_their_values() {
        let conn = seeded();
        let result = run_read_only(
            &conn,
            "SELECT l.name, r.name FROM bots l JOIN bots r ON r.bot_id = l.bot_id + 1",
            10,
        )
        .unwrap();

        assert_eq!(result.columns, vec!["name".to_string(), "name_1".to_string()]);
        assert_eq!(result.rows[0]["name"], Value::from("Bot_01"));
        assert_eq!(result.rows[0]["name_1"], Value::from("Bot_02"));
    }

    #[test]
    fn test_store_error_surfaces() {
        let conn = seeded();
        let result = run_read_only(&conn, "SELECT CAST(name AS INTEGER) FROM bots", 10);
        assert!(matches!(result, Err(ExecutionError::Database(_))));

        // The connection is left usable
        let ok = run_read_only(&conn, "SELECT name FROM bots ORDER BY bot_id", 10).unwrap();
        assert_eq!(ok.row_count, 2);
        assert_eq!(ok.columns, vec!["name".to_string()]);
        assert_eq!(ok.rows[0]["name"], Value::from("Bot_01"));
    }
}
