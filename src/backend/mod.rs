//! Backend Contracts - execution and schema discovery collaborators
//!
//! Backends are external: one per dialect, reached over whatever transport
//! the deployment uses. The engine only depends on these traits.

pub mod http;

pub use http::*;

use crate::dialect::Dialect;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of running one query.
///
/// A query the backend rejected is `success: false` with `error` set; only
/// connectivity failures surface as `Err` from [`ExecutionBackend::execute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<Row>,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn rows(columns: Vec<String>, data: Vec<Row>) -> Self {
        Self {
            success: true,
            row_count: data.len(),
            columns,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(default, alias = "type")]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

/// Pre-defined semantic-model measure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureSchema {
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredSchema {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
    #[serde(default)]
    pub measures: Vec<MeasureSchema>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl DiscoveredSchema {
    pub fn with_table(mut self, name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        self.success = true;
        self.tables.insert(name.into(), TableSchema { columns });
        self
    }

    pub fn with_measure(mut self, name: impl Into<String>) -> Self {
        self.measures.push(MeasureSchema {
            name: name.into(),
            table: None,
            expression: None,
        });
        self
    }
}

/// Runs queries in one dialect
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn execute(&self, query: &str) -> Result<ExecutionOutcome>;
}

/// Describes the tables, columns and measures available to queries
#[async_trait]
pub trait SchemaDiscovery: Send + Sync {
    async fn discover(&self) -> Result<DiscoveredSchema>;
}
