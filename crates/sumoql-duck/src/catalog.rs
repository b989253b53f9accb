//! Schema catalog extraction from a DuckDB store

use std::path::Path;
use std::sync::Arc;

use duckdb::{AccessMode, Config, Connection};
use sumoql_sql::{ColumnDescriptor, SchemaDescriptor, TableDescriptor};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database {0} not found; run the setup step to create it first")]
    Missing(String),

    #[error("Database unreachable: {0}")]
    Unreachable(#[from] duckdb::Error),

    #[error("Database contains no tables")]
    Empty,
}

/// Open a DuckDB file for reading only
pub fn open_store<P: AsRef<Path>>(db_path: P) -> Result<Connection, CatalogError> {
    let path = db_path.as_ref();
    if !path.exists() {
        return Err(CatalogError::Missing(path.display().to_string()));
    }

    let config = Config::default().access_mode(AccessMode::ReadOnly)?;
    let conn = Connection::open_with_flags(path, config)?;
    Ok(conn)
}

/// Read-only view of the store's tables, loaded once
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    schema: Arc<SchemaDescriptor>,
}

impl SchemaCatalog {
    /// Extract catalog information from a DuckDB connection.
    ///
    /// Reads every table and view in the `main` schema, its columns in
    /// declaration order, its row count and up to `sample_limit` distinct
    /// non-null values per column.
    pub fn load(conn: &Connection, sample_limit: usize) -> Result<Self, CatalogError> {
        let mut stmt = conn.prepare(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'main' ORDER BY table_name",
        )?;
        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<duckdb::Result<Vec<_>>>()?;

        if table_names.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut tables = Vec::with_capacity(table_names.len());
        for table_name in table_names {
            tables.push(Self::extract_table(conn, &table_name, sample_limit)?);
        }

        tracing::info!(tables = tables.len(), "Schema catalog loaded");

        Ok(Self {
            schema: Arc::new(SchemaDescriptor::new(tables)),
        })
    }

    /// Wrap an already-built descriptor
    pub fn from_descriptor(schema: SchemaDescriptor) -> Result<Self, CatalogError> {
        if schema.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self {
            schema: Arc::new(schema),
        })
    }

    pub fn describe(&self) -> Arc<SchemaDescriptor> {
        Arc::clone(&self.schema)
    }

    fn extract_table(
        conn: &Connection,
        table_name: &str,
        sample_limit: usize,
    ) -> Result<TableDescriptor, CatalogError> {
        let mut stmt = conn.prepare(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = 'main' AND table_name = ? \
             ORDER BY ordinal_position",
        )?;
        let columns: Vec<(String, String, String)> = stmt
            .query_map([table_name], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<duckdb::Result<Vec<_>>>()?;

        let count_query = format!("SELECT COUNT(*) FROM {}", quote_ident(table_name));
        let row_count: i64 = conn.query_row(&count_query, [], |row| row.get(0))?;

        let mut descriptors = Vec::with_capacity(columns.len());
        for (name, data_type, is_nullable) in columns {
            let sample_values = if sample_limit > 0 {
                Self::sample_values(conn, table_name, &name, sample_limit)?
            } else {
                Vec::new()
            };

            descriptors.push(ColumnDescriptor {
                name,
                data_type,
                nullable: is_nullable == "YES",
                sample_values,
            });
        }

        Ok(TableDescriptor {
            name: table_name.to_string(),
            columns: descriptors,
            row_count: u64::try_from(row_count).ok(),
        })
    }

    fn sample_values(
        conn: &Connection,
        table_name: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, CatalogError> {
        let column = quote_ident(column);
        let query = format!(
            "SELECT DISTINCT {column} FROM {} WHERE {column} IS NOT NULL ORDER BY {column} LIMIT {limit}",
            quote_ident(table_name),
        );

        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query([])?;
        let mut samples = Vec::new();
        while let Some(row) = rows.next()? {
            samples.push(crate::value::to_json(row.get_ref(0)?));
        }
        Ok(samples)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE bots (bot_id INTEGER NOT NULL, name VARCHAR, language VARCHAR);
             INSERT INTO bots VALUES (1, 'Bot_01', 'Rust'), (2, 'Bot_02', 'Python'), (3, 'Bot_03', 'Rust');
             CREATE TABLE matches (match_id INTEGER, winner_bot_id INTEGER);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_load_catalog() {
        let conn = seeded();
        let catalog = SchemaCatalog::load(&conn, 2).unwrap();
        let schema = catalog.describe();

        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["bots", "matches"]);

        let bots = schema.table("bots").unwrap();
        assert_eq!(bots.row_count, Some(3));
        let columns: Vec<&str> = bots.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["bot_id", "name", "language"]);
        assert!(!bots.column("bot_id").unwrap().nullable);
        assert_eq!(bots.column("bot_id").unwrap().data_type, "INTEGER");
        assert_eq!(
            bots.column("language").unwrap().sample_values,
            vec![serde_json::json!("Python"), serde_json::json!("Rust")]
        );

        let matches = schema.table("matches").unwrap();
        assert_eq!(matches.row_count, Some(0));
        assert!(matches.columns[0].sample_values.is_empty());
    }

    #[test]
    fn test_empty_store() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            SchemaCatalog::load(&conn, 3),
            Err(CatalogError::Empty)
        ));
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("sumoql-does-not-exist.duckdb");
        assert!(matches!(open_store(&path), Err(CatalogError::Missing(_))));
    }
}
