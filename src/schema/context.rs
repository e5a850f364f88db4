//! Schema context builder
//!
//! Renders a discovered schema into the prompt text handed to the model and
//! keeps the identifier vocabulary used for deterministic schema repairs.
//! Tables are listed by business priority; columns are grouped by role.

use crate::backend::{ColumnSchema, DiscoveredSchema, TableSchema};
use crate::dialect::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use strsim::normalized_levenshtein;

const BUSINESS_TERMS: &[&str] = &["sales", "customer", "order", "product", "revenue"];
const FACT_TERMS: &[&str] = &["fact", "transaction", "activity"];
const DIMENSION_TERMS: &[&str] = &["dimension", "lookup"];
const SYSTEM_TERMS: &[&str] = &["temp", "tmp", "sys", "log", "audit"];

const MAX_MEASURES_LISTED: usize = 15;

/// Known identifiers of one schema, tables in priority order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaVocabulary {
    pub tables: Vec<String>,
    pub columns: BTreeMap<String, Vec<String>>,
    pub measures: Vec<String>,
}

impl SchemaVocabulary {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.measures.is_empty()
    }

    pub fn first_table(&self) -> Option<&str> {
        self.tables.first().map(String::as_str)
    }

    /// Every table, column and measure name
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.tables
            .iter()
            .chain(self.columns.values().flatten())
            .chain(self.measures.iter())
            .map(String::as_str)
    }

    /// Case-insensitive membership
    pub fn contains(&self, name: &str) -> bool {
        self.identifiers().any(|known| known.eq_ignore_ascii_case(name))
    }

    /// Closest known identifier with similarity of at least `min_similarity`.
    /// `name` itself never counts, so a known name that the backend still
    /// rejects is replaced by its nearest neighbour.
    pub fn nearest(&self, name: &str, min_similarity: f64) -> Option<&str> {
        let lowered = name.to_lowercase();
        self.identifiers()
            .filter(|known| !known.eq_ignore_ascii_case(name))
            .map(|known| (known, normalized_levenshtein(&lowered, &known.to_lowercase())))
            .filter(|(_, score)| *score >= min_similarity)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(known, _)| known)
    }
}

/// Prompt-ready description of the data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaContext {
    pub dialect: Dialect,
    pub text: String,
    pub vocabulary: SchemaVocabulary,
    /// False for the placeholder used when discovery failed
    pub available: bool,
}

impl SchemaContext {
    pub fn build(dialect: Dialect, schema: &DiscoveredSchema) -> Self {
        let tables: BTreeMap<&str, Vec<&ColumnSchema>> = schema
            .tables
            .iter()
            .map(|(name, table)| (name.as_str(), visible_columns(table)))
            .collect();
        let order = prioritize_tables(&schema.tables);

        let text = match dialect {
            Dialect::Sql => render_sql(&order, &tables),
            Dialect::Dax => render_dax(&order, &tables, schema),
        };

        let vocabulary = SchemaVocabulary {
            columns: order
                .iter()
                .map(|t| {
                    let cols = tables
                        .get(t.as_str())
                        .map(|cols| cols.iter().map(|c| c.name.clone()).collect())
                        .unwrap_or_default();
                    (t.clone(), cols)
                })
                .collect(),
            tables: order,
            measures: schema.measures.iter().map(|m| m.name.clone()).collect(),
        };

        Self {
            dialect,
            text,
            vocabulary,
            available: true,
        }
    }

    /// Placeholder used when discovery fails
    pub fn unavailable(dialect: Dialect) -> Self {
        let text = match dialect {
            Dialect::Sql => "Schema unavailable - using fallback mode",
            Dialect::Dax => "Model unavailable - using fallback mode",
        };
        Self {
            dialect,
            text: text.to_string(),
            vocabulary: SchemaVocabulary::default(),
            available: false,
        }
    }

    /// Measure hints for semantic-model prompts
    pub fn measures_context(&self) -> String {
        if self.vocabulary.measures.is_empty() {
            return "No pre-calculated measures found. Create aggregations using DAX functions.".to_string();
        }
        format!(
            "Use existing measures where possible:\n{}",
            self.vocabulary
                .measures
                .iter()
                .take(MAX_MEASURES_LISTED)
                .map(|m| format!("  - [{}]", m))
                .collect::<Vec<_>>()
                .join("\n")
        )
    }
}

fn is_system_column(name: &str) -> bool {
    let lowered = name.to_lowercase();
    lowered.starts_with("__") || lowered == "rowguid" || lowered == "timestamp"
}

fn visible_columns(table: &TableSchema) -> Vec<&ColumnSchema> {
    table.columns.iter().filter(|c| !is_system_column(&c.name)).collect()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

pub fn table_priority(name: &str, column_count: usize) -> i32 {
    let lowered = name.to_lowercase();
    let mut score = 0;
    if contains_any(&lowered, BUSINESS_TERMS) {
        score += 100;
    }
    if contains_any(&lowered, FACT_TERMS) {
        score += 80;
    }
    if lowered.starts_with("dim") || contains_any(&lowered, DIMENSION_TERMS) {
        score += 60;
    }
    if contains_any(&lowered, SYSTEM_TERMS) {
        score -= 50;
    }
    if column_count > 10 {
        score += 20;
    } else if column_count > 5 {
        score += 10;
    }
    score
}

/// Table names by descending priority, alphabetical within a score
fn prioritize_tables(tables: &BTreeMap<String, TableSchema>) -> Vec<String> {
    let mut names: Vec<(&String, i32)> = tables
        .iter()
        .map(|(name, table)| (name, table_priority(name, table.columns.len())))
        .collect();
    names.sort_by(|a, b| b.1.cmp(&a.1));
    names.into_iter().map(|(name, _)| name.clone()).collect()
}

pub fn estimate_table_size(name: &str, column_count: usize) -> &'static str {
    let lowered = name.to_lowercase();
    if contains_any(&lowered, &["fact", "transaction", "log", "history"]) {
        "Large (1M+ rows)"
    } else if contains_any(&lowered, &["sales", "order", "customer"]) || column_count > 15 {
        "Medium (10K-1M rows)"
    } else {
        "Small (<10K rows)"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnRole {
    Key,
    Date,
    Measure,
    Text,
    Number,
    Category,
}

impl ColumnRole {
    const ORDERED: [ColumnRole; 6] = [
        ColumnRole::Key,
        ColumnRole::Date,
        ColumnRole::Measure,
        ColumnRole::Text,
        ColumnRole::Number,
        ColumnRole::Category,
    ];

    fn label(&self) -> &'static str {
        match self {
            ColumnRole::Key => "Keys/IDs",
            ColumnRole::Date => "Dates",
            ColumnRole::Measure => "Measures",
            ColumnRole::Text => "Text",
            ColumnRole::Number => "Numbers",
            ColumnRole::Category => "Categories",
        }
    }

    fn of(column: &ColumnSchema) -> Self {
        let name = column.name.to_lowercase();
        let data_type = column.data_type.to_lowercase();
        if contains_any(&name, &["id", "key", "guid"]) {
            ColumnRole::Key
        } else if contains_any(&name, &["date", "time", "created", "modified"]) {
            ColumnRole::Date
        } else if contains_any(&name, &["amount", "total", "price", "cost", "revenue", "sum"]) {
            ColumnRole::Measure
        } else if contains_any(&data_type, &["varchar", "nvarchar", "text", "string"]) {
            if contains_any(&name, &["name", "description", "category", "type", "status"]) {
                ColumnRole::Category
            } else {
                ColumnRole::Text
            }
        } else if contains_any(&data_type, &["int", "decimal", "float", "numeric", "money"]) {
            ColumnRole::Number
        } else {
            ColumnRole::Text
        }
    }
}

fn render_sql(order: &[String], tables: &BTreeMap<&str, Vec<&ColumnSchema>>) -> String {
    let mut text = String::from("Available tables and columns:\n\n");
    for name in order {
        let columns = tables.get(name.as_str()).cloned().unwrap_or_default();
        let _ = writeln!(text, "{}:", name);
        for role in ColumnRole::ORDERED {
            let names: Vec<&str> = columns
                .iter()
                .filter(|c| ColumnRole::of(c) == role)
                .take(8)
                .map(|c| c.name.as_str())
                .collect();
            if !names.is_empty() {
                let _ = writeln!(text, "  {}: {}", role.label(), names.join(", "));
            }
        }
        let _ = writeln!(text, "  Estimated rows: {}\n", estimate_table_size(name, columns.len()));
    }
    text
}

fn render_dax(
    order: &[String],
    tables: &BTreeMap<&str, Vec<&ColumnSchema>>,
    schema: &DiscoveredSchema,
) -> String {
    let mut text = String::from("Available semantic model:\n\nTABLES:\n");
    for name in order {
        let columns = tables.get(name.as_str()).cloned().unwrap_or_default();
        let _ = writeln!(text, "\n'{}':", name);

        let pick = |terms: &[&str]| -> Vec<&str> {
            columns
                .iter()
                .filter(|c| contains_any(&c.name.to_lowercase(), terms))
                .map(|c| c.name.as_str())
                .collect()
        };
        let keys = pick(&["key", "id"]);
        let dates = pick(&["date", "time", "year", "month"]);
        let measures = pick(&["amount", "total", "sum", "count", "value"]);
        let others: Vec<&str> = columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|n| !keys.contains(n) && !dates.contains(n) && !measures.contains(n))
            .collect();

        for (label, names, limit) in [
            ("Keys", &keys, 5),
            ("Dates", &dates, 5),
            ("Measures", &measures, 8),
            ("Other", &others, 8),
        ] {
            if !names.is_empty() {
                let shown: Vec<&str> = names.iter().take(limit).copied().collect();
                let _ = writeln!(text, "  {}: {}", label, shown.join(", "));
            }
        }
    }

    if !schema.measures.is_empty() {
        text.push_str("\nCALCULATED MEASURES:\n");
        for measure in schema.measures.iter().take(MAX_MEASURES_LISTED) {
            let _ = writeln!(text, "  - [{}]", measure.name);
        }
        if schema.measures.len() > MAX_MEASURES_LISTED {
            let _ = writeln!(
                text,
                "  ... and {} more measures",
                schema.measures.len() - MAX_MEASURES_LISTED
            );
        }
    }
    text
}
