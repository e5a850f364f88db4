use super::{KnowledgeEntry, NewKnowledge};
use crate::dialect::Dialect;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Candidate query for the fuzzy search path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeFilter {
    pub category: Option<Dialect>,
    /// Every term must occur in the normalized question or the context
    pub terms: Vec<String>,
    pub min_success_count: u32,
    pub limit: usize,
}

impl KnowledgeFilter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn category(mut self, category: Dialect) -> Self {
        self.category = Some(category);
        self
    }

    pub fn terms(mut self, terms: impl IntoIterator<Item = String>) -> Self {
        self.terms = terms.into_iter().collect();
        self
    }

    pub fn min_success_count(mut self, count: u32) -> Self {
        self.min_success_count = count;
        self
    }
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "id", rename_all = "snake_case")]
pub enum UpsertAction {
    Created(i64),
    Updated(i64),
}

impl UpsertAction {
    pub fn id(&self) -> i64 {
        match self {
            UpsertAction::Created(id) | UpsertAction::Updated(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub name: String,
    pub count: u64,
    pub avg_success: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub queries_added: u64,
    pub avg_success: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeAnalytics {
    pub total_entries: u64,
    pub unique_categories: u64,
    pub average_success_count: f64,
    pub max_success_count: u32,
    /// Entries with more than five recorded successes
    pub highly_successful: u64,
    pub categories: Vec<CategoryStats>,
    /// Entries added per day over the last 30 days, newest first
    pub recent_activity: Vec<DailyActivity>,
}

/// Portable snapshot for backup or sharing between stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub category: Option<Dialect>,
    pub total: usize,
    pub entries: Vec<KnowledgeEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<String>,
}

/// Durable store of successful question/query pairs.
///
/// `(question_hash, category)` is unique: upserting an existing pair updates
/// it in place and bumps its success count.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Up to `limit` entries with this hash, most successful first
    async fn find_by_hash(&self, hash: &str, category: Dialect, limit: usize) -> Result<Vec<KnowledgeEntry>>;

    async fn search(&self, filter: &KnowledgeFilter) -> Result<Vec<KnowledgeEntry>>;

    async fn upsert(&self, entry: NewKnowledge) -> Result<UpsertAction>;

    /// Refresh `last_used`
    async fn touch(&self, id: i64) -> Result<()>;

    async fn record_feedback(&self, id: i64, success: bool) -> Result<()>;

    async fn popular(&self, category: Option<Dialect>, limit: usize) -> Result<Vec<KnowledgeEntry>>;

    async fn all(&self, category: Option<Dialect>) -> Result<Vec<KnowledgeEntry>>;

    async fn analytics(&self) -> Result<KnowledgeAnalytics>;

    /// Delete stale entries that fail more than they succeed; returns the count removed
    async fn cleanup(&self, older_than_days: u32) -> Result<usize>;

    async fn export(&self, category: Option<Dialect>) -> Result<KnowledgeExport> {
        let entries = self.all(category).await?;
        Ok(KnowledgeExport {
            version: "1.0".to_string(),
            exported_at: Utc::now(),
            category,
            total: entries.len(),
            entries,
        })
    }

    async fn import(&self, snapshot: KnowledgeExport) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for entry in snapshot.entries {
            let question = entry.question.clone();
            match self.upsert(NewKnowledge::from(entry)).await {
                Ok(_) => report.imported += 1,
                Err(e) => report.errors.push(format!("Failed to import '{}': {}", question, e)),
            }
        }
        Ok(report)
    }
}
