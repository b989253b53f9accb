//! Schema descriptor types shared by every pipeline stage

use serde::{Deserialize, Serialize};

/// Column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<serde_json::Value>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            sample_values: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_samples(mut self, samples: Vec<serde_json::Value>) -> Self {
        self.sample_values = samples;
        self
    }
}

/// Table metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub row_count: Option<u64>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
            row_count: None,
        }
    }

    /// Case-insensitive column lookup
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Ordered set of tables the store exposes.
///
/// Built once at startup and shared read-only afterwards. Identifier lookups
/// are case-insensitive, matching DuckDB's identifier resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableDescriptor>,
}

impl SchemaDescriptor {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        Self { tables }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// True if any table has a column with this name
    pub fn has_column(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.column(name).is_some())
    }
}
