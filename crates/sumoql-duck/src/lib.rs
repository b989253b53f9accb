//! DuckDB store access for SumoQL
//!
//! Loads the read-only schema catalog and executes validated queries with
//! resource limits.

pub mod catalog;
pub mod executor;
pub mod value;

pub use catalog::{open_store, CatalogError, SchemaCatalog};
pub use executor::{ExecutionError, ExecutionLimits, ExecutionResult, QueryExecutor};
