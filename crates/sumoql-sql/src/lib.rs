//! SumoQL SQL layer
//!
//! Schema descriptors, extraction of SQL from model output, and validation of
//! candidate statements. Everything here is pure: no database or network I/O.

pub mod candidate;
pub mod extract;
pub mod schema;
pub mod validate;

pub use candidate::CandidateQuery;
pub use extract::extract_sql;
pub use schema::{ColumnDescriptor, SchemaDescriptor, TableDescriptor};
pub use validate::{validate, InvalidReason, ValidatedQuery, ValidationOutcome, Validator};
