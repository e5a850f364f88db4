//! Knowledge store: durable memory of question/query pairs that executed
//! successfully, used to bias new generations.

pub mod search;
pub mod sqlite_store;
pub mod store;

pub use search::*;
pub use sqlite_store::*;
pub use store::*;

use crate::dialect::Dialect;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One remembered question and the query that answered it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub category: Dialect,
    pub question: String,
    pub normalized_question: String,
    /// BLAKE3 hex digest of `"{category}:{normalized_question}"`
    pub question_hash: String,
    /// Interpretation or outcome summary
    pub context: Option<String>,
    pub query_text: String,
    pub answer: String,
    pub response_type: String,
    pub success_count: u32,
    pub failure_count: u32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// Payload for [`KnowledgeStore::upsert`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKnowledge {
    pub category: Dialect,
    pub question: String,
    pub query_text: String,
    pub answer: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_response_type")]
    pub response_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_response_type() -> String {
    "text".to_string()
}

impl NewKnowledge {
    pub fn new(
        category: Dialect,
        question: impl Into<String>,
        query_text: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            category,
            question: question.into(),
            query_text: query_text.into(),
            answer: answer.into(),
            context: None,
            response_type: default_response_type(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn normalized_question(&self) -> String {
        normalize_question(&self.question)
    }

    pub fn question_hash(&self) -> String {
        question_hash(self.category.category(), &self.question)
    }
}

impl From<KnowledgeEntry> for NewKnowledge {
    fn from(entry: KnowledgeEntry) -> Self {
        Self {
            category: entry.category,
            question: entry.question,
            query_text: entry.query_text,
            answer: entry.answer,
            context: entry.context,
            response_type: entry.response_type,
            metadata: entry.metadata,
        }
    }
}

lazy_static! {
    static ref NORMALIZE_STOP_WORDS: HashSet<&'static str> = [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "from", "up", "about", "into", "through", "during",
        "how", "what", "when", "where", "which", "who", "whom", "this", "that",
        "these", "those", "am", "is", "are", "was", "were", "be", "been", "being",
        "have", "has", "had", "do", "does", "did", "will", "would", "should",
        "could", "may", "might", "must", "can", "shall", "me", "my", "give",
    ]
    .into_iter()
    .collect();
}

/// Order-insensitive canonical form: lowercase, drop stop words, sort words
pub fn normalize_question(question: &str) -> String {
    let lowered = question.trim().to_lowercase();
    let mut words: Vec<&str> = lowered
        .split_whitespace()
        .filter(|w| !NORMALIZE_STOP_WORDS.contains(w))
        .collect();
    words.sort_unstable();
    words.join(" ")
}

/// Deduplication key for a question within one category
pub fn question_hash(category: &str, question: &str) -> String {
    let combined = format!("{}:{}", category, normalize_question(question));
    blake3::hash(combined.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_is_order_insensitive() {
        assert_eq!(
            normalize_question("What were the total sales by year"),
            normalize_question("total sales by year")
        );
        assert_eq!(normalize_question("  Total   SALES by Year "), "sales total year");
    }

    #[test]
    fn test_hash_differs_by_category() {
        let q = "total sales by year";
        assert_eq!(question_hash("sql", q), question_hash("sql", "year sales total"));
        assert_ne!(question_hash("sql", q), question_hash("semantic_model", q));
        assert_eq!(question_hash("sql", q).len(), 64);
    }
}
