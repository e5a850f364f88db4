//! Query dialects understood by the execution backends.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target query language of one execution backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Warehouse T-SQL
    Sql,
    /// Semantic-model DAX
    Dax,
}

impl Dialect {
    /// Knowledge-store category for entries produced in this dialect
    pub fn category(&self) -> &'static str {
        match self {
            Dialect::Sql => "sql",
            Dialect::Dax => "semantic_model",
        }
    }

    /// Human-facing language name used in prompts and traces
    pub fn language(&self) -> &'static str {
        match self {
            Dialect::Sql => "T-SQL",
            Dialect::Dax => "DAX",
        }
    }

    /// Keyword every query in this dialect must start with, if any
    pub fn entry_keyword(&self) -> Option<&'static str> {
        match self {
            Dialect::Sql => None,
            Dialect::Dax => Some("EVALUATE"),
        }
    }

    /// Cache key under which this dialect's schema context is stored
    pub fn schema_cache_key(&self) -> String {
        format!("{}_schema_v2", self.category())
    }

    pub fn from_category(category: &str) -> Option<Self> {
        match category {
            "sql" => Some(Dialect::Sql),
            "semantic_model" => Some(Dialect::Dax),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.language())
    }
}

impl FromStr for Dialect {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sql" | "tsql" | "t-sql" => Ok(Dialect::Sql),
            "dax" | "semantic_model" | "semantic-model" => Ok(Dialect::Dax),
            other => Err(EngineError::Config(format!("Unknown dialect: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dialect_aliases() {
        assert_eq!("T-SQL".parse::<Dialect>().unwrap(), Dialect::Sql);
        assert_eq!("semantic_model".parse::<Dialect>().unwrap(), Dialect::Dax);
        assert!("cypher".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_category_round_trip() {
        for dialect in [Dialect::Sql, Dialect::Dax] {
            assert_eq!(Dialect::from_category(dialect.category()), Some(dialect));
        }
    }
}
