//! SQLite-backed knowledge store
//!
//! One table, `knowledge_entries`, unique on `(question_hash, category)`.
//! Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.

use super::store::{
    CategoryStats, DailyActivity, KnowledgeAnalytics, KnowledgeFilter, KnowledgeStore, UpsertAction,
};
use super::{KnowledgeEntry, NewKnowledge};
use crate::clock::{Clock, SystemClock};
use crate::dialect::Dialect;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const ENTRY_COLUMNS: &str = "id, category, question, normalized_question, question_hash, context, \
     query_text, answer, response_type, success_count, failure_count, metadata, \
     created_at, updated_at, last_used";

pub struct SqliteKnowledgeStore {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteKnowledgeStore {
    /// Open (creating if needed) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Connection::open(path)
            .map_err(|e| EngineError::Knowledge(format!("Failed to open database: {}", e)))?;
        Self::with_connection(db, Arc::new(SystemClock))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Connection::open_in_memory()
            .map_err(|e| EngineError::Knowledge(format!("Failed to open database: {}", e)))?;
        Self::with_connection(db, clock)
    }

    fn with_connection(db: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self {
            db: Mutex::new(db),
            clock,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_text(&self) -> String {
        timestamp(self.clock.now())
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.lock();
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                question TEXT NOT NULL,
                normalized_question TEXT NOT NULL,
                question_hash TEXT NOT NULL,
                context TEXT,
                query_text TEXT NOT NULL,
                answer TEXT NOT NULL,
                response_type TEXT NOT NULL DEFAULT 'text',
                success_count INTEGER NOT NULL DEFAULT 1,
                failure_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_used TEXT NOT NULL,
                UNIQUE(question_hash, category)
            );
            CREATE INDEX IF NOT EXISTS idx_knowledge_category ON knowledge_entries(category);
            CREATE INDEX IF NOT EXISTS idx_knowledge_success ON knowledge_entries(success_count DESC, last_used DESC);
            "#,
        )
        .map_err(|e| EngineError::Knowledge(format!("Failed to create schema: {}", e)))?;
        Ok(())
    }

    fn query_entries(&self, sql: &str, values: Vec<Value>) -> Result<Vec<KnowledgeEntry>> {
        let db = self.lock();
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_entry)?;
        let entries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {:?}: {}", raw, e)))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let category: String = row.get(1)?;
    let category = Dialect::from_category(&category)
        .ok_or_else(|| conversion_error(1, format!("unknown category {:?}", category)))?;
    let metadata: String = row.get(11)?;

    Ok(KnowledgeEntry {
        id: row.get(0)?,
        category,
        question: row.get(2)?,
        normalized_question: row.get(3)?,
        question_hash: row.get(4)?,
        context: row.get(5)?,
        query_text: row.get(6)?,
        answer: row.get(7)?,
        response_type: row.get(8)?,
        success_count: row.get(9)?,
        failure_count: row.get(10)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        created_at: parse_timestamp(row, 12)?,
        updated_at: parse_timestamp(row, 13)?,
        last_used: parse_timestamp(row, 14)?,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn find_by_hash(&self, hash: &str, category: Dialect, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let sql = format!(
            "SELECT {} FROM knowledge_entries WHERE question_hash = ?1 AND category = ?2 \
             ORDER BY success_count DESC, last_used DESC LIMIT ?3",
            ENTRY_COLUMNS
        );
        self.query_entries(
            &sql,
            vec![
                Value::Text(hash.to_string()),
                Value::Text(category.category().to_string()),
                Value::Integer(limit as i64),
            ],
        )
    }

    async fn search(&self, filter: &KnowledgeFilter) -> Result<Vec<KnowledgeEntry>> {
        let mut sql = format!(
            "SELECT {} FROM knowledge_entries WHERE success_count >= ?",
            ENTRY_COLUMNS
        );
        let mut values = vec![Value::Integer(filter.min_success_count as i64)];

        if let Some(category) = filter.category {
            sql.push_str(" AND category = ?");
            values.push(Value::Text(category.category().to_string()));
        }
        for term in &filter.terms {
            sql.push_str(" AND (normalized_question LIKE ? OR IFNULL(context, '') LIKE ?)");
            let pattern = format!("%{}%", term.to_lowercase());
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }
        sql.push_str(" ORDER BY success_count DESC, last_used DESC LIMIT ?");
        values.push(Value::Integer(filter.limit as i64));

        self.query_entries(&sql, values)
    }

    async fn upsert(&self, entry: NewKnowledge) -> Result<UpsertAction> {
        let normalized = entry.normalized_question();
        let hash = entry.question_hash();
        let category = entry.category.category();
        let metadata = serde_json::to_string(&entry.metadata)?;
        let now = self.now_text();

        let mut db = self.lock();
        let tx = db.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM knowledge_entries WHERE question_hash = ?1 AND category = ?2",
                params![hash, category],
                |row| row.get(0),
            )
            .optional()?;

        let action = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE knowledge_entries
                     SET answer = ?1, query_text = ?2, metadata = ?3,
                         context = COALESCE(?4, context),
                         success_count = success_count + 1,
                         last_used = ?5, updated_at = ?5
                     WHERE id = ?6",
                    params![entry.answer, entry.query_text, metadata, entry.context, now, id],
                )?;
                UpsertAction::Updated(id)
            }
            None => {
                tx.execute(
                    "INSERT INTO knowledge_entries
                     (category, question, normalized_question, question_hash, context,
                      query_text, answer, response_type, metadata, created_at, updated_at, last_used)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?10)",
                    params![
                        category,
                        entry.question,
                        normalized,
                        hash,
                        entry.context,
                        entry.query_text,
                        entry.answer,
                        entry.response_type,
                        metadata,
                        now,
                    ],
                )?;
                UpsertAction::Created(tx.last_insert_rowid())
            }
        };
        tx.commit()?;

        match action {
            UpsertAction::Created(id) => info!("Added new knowledge entry: {}", id),
            UpsertAction::Updated(id) => info!("Updated existing knowledge entry: {}", id),
        }
        Ok(action)
    }

    async fn touch(&self, id: i64) -> Result<()> {
        let now = self.now_text();
        self.lock().execute(
            "UPDATE knowledge_entries SET last_used = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    async fn record_feedback(&self, id: i64, success: bool) -> Result<()> {
        let now = self.now_text();
        let sql = if success {
            "UPDATE knowledge_entries SET success_count = success_count + 1, last_used = ?1 WHERE id = ?2"
        } else {
            "UPDATE knowledge_entries SET failure_count = failure_count + 1, last_used = ?1 WHERE id = ?2"
        };
        let changed = self.lock().execute(sql, params![now, id])?;
        if changed == 0 {
            return Err(EngineError::Knowledge(format!("No knowledge entry with id {}", id)));
        }
        debug!("Recorded {} feedback for entry {}", if success { "positive" } else { "negative" }, id);
        Ok(())
    }

    async fn popular(&self, category: Option<Dialect>, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        self.search(&KnowledgeFilter {
            category,
            terms: Vec::new(),
            min_success_count: 1,
            limit,
        })
        .await
    }

    async fn all(&self, category: Option<Dialect>) -> Result<Vec<KnowledgeEntry>> {
        match category {
            Some(category) => self.query_entries(
                &format!(
                    "SELECT {} FROM knowledge_entries WHERE category = ?1 ORDER BY created_at DESC, id DESC",
                    ENTRY_COLUMNS
                ),
                vec![Value::Text(category.category().to_string())],
            ),
            None => self.query_entries(
                &format!(
                    "SELECT {} FROM knowledge_entries ORDER BY created_at DESC, id DESC",
                    ENTRY_COLUMNS
                ),
                Vec::new(),
            ),
        }
    }

    async fn analytics(&self) -> Result<KnowledgeAnalytics> {
        let cutoff = timestamp(self.clock.now() - Duration::days(30));
        let db = self.lock();

        let (total, unique, avg, max, highly): (i64, i64, Option<f64>, Option<i64>, Option<i64>) = db
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT category), AVG(CAST(success_count AS REAL)),
                        MAX(success_count), SUM(CASE WHEN success_count > 5 THEN 1 ELSE 0 END)
                 FROM knowledge_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

        let mut stmt = db.prepare(
            "SELECT category, COUNT(*) AS count, AVG(CAST(success_count AS REAL))
             FROM knowledge_entries GROUP BY category ORDER BY count DESC",
        )?;
        let categories = stmt
            .query_map([], |row| {
                Ok(CategoryStats {
                    name: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    avg_success: round2(row.get::<_, Option<f64>>(2)?.unwrap_or(0.0)),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = db.prepare(
            "SELECT substr(created_at, 1, 10) AS day, COUNT(*), AVG(CAST(success_count AS REAL))
             FROM knowledge_entries WHERE created_at >= ?1
             GROUP BY day ORDER BY day DESC LIMIT 30",
        )?;
        let recent_activity = stmt
            .query_map(params![cutoff], |row| {
                let day: String = row.get(0)?;
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|e| conversion_error(0, format!("bad date {:?}: {}", day, e)))?;
                Ok(DailyActivity {
                    date,
                    queries_added: row.get::<_, i64>(1)? as u64,
                    avg_success: round2(row.get::<_, Option<f64>>(2)?.unwrap_or(0.0)),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(KnowledgeAnalytics {
            total_entries: total as u64,
            unique_categories: unique as u64,
            average_success_count: round2(avg.unwrap_or(0.0)),
            max_success_count: max.unwrap_or(0) as u32,
            highly_successful: highly.unwrap_or(0) as u64,
            categories,
            recent_activity,
        })
    }

    async fn cleanup(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = timestamp(self.clock.now() - Duration::days(older_than_days as i64));
        let deleted = self.lock().execute(
            "DELETE FROM knowledge_entries
             WHERE last_used < ?1 AND success_count < 3 AND failure_count > success_count",
            params![cutoff],
        )?;
        if deleted > 0 {
            info!("Cleaned up {} stale knowledge entries", deleted);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::knowledge::question_hash;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_deduplicates_reordered_questions() {
        let store = SqliteKnowledgeStore::open_in_memory().unwrap();

        let first = store
            .upsert(NewKnowledge::new(Dialect::Sql, "total sales by year", "SELECT 1", "first"))
            .await
            .unwrap();
        let second = store
            .upsert(
                NewKnowledge::new(Dialect::Sql, "What were the total sales by year?", "SELECT 2", "second")
                    .with_metadata(json!({"rows": 3})),
            )
            .await
            .unwrap();

        // Trailing "?" keeps "year?" distinct from "year"
        assert!(matches!(first, UpsertAction::Created(_)));
        assert!(matches!(second, UpsertAction::Created(_)));

        let third = store
            .upsert(NewKnowledge::new(Dialect::Sql, "year sales total", "SELECT 3", "third"))
            .await
            .unwrap();
        assert_eq!(third, UpsertAction::Updated(first.id()));

        let entries = store
            .find_by_hash(&question_hash("sql", "total sales by year"), Dialect::Sql, 3)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].success_count, 2);
        assert_eq!(entries[0].query_text, "SELECT 3");
        assert_eq!(entries[0].answer, "third");
    }

    #[tokio::test]
    async fn test_same_question_in_other_category_is_separate() {
        let store = SqliteKnowledgeStore::open_in_memory().unwrap();
        let a = store
            .upsert(NewKnowledge::new(Dialect::Sql, "total sales", "SELECT 1", "a"))
            .await
            .unwrap();
        let b = store
            .upsert(NewKnowledge::new(Dialect::Dax, "total sales", "EVALUATE x", "b"))
            .await
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(store.all(None).await.unwrap().len(), 2);
        assert_eq!(store.all(Some(Dialect::Dax)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_filters_by_terms_and_success() {
        let store = SqliteKnowledgeStore::open_in_memory().unwrap();
        let sales = store
            .upsert(NewKnowledge::new(Dialect::Sql, "total sales per region", "SELECT 1", ""))
            .await
            .unwrap();
        store
            .upsert(NewKnowledge::new(Dialect::Sql, "count customers", "SELECT 2", ""))
            .await
            .unwrap();

        let filter = KnowledgeFilter::new(20)
            .category(Dialect::Sql)
            .terms(vec!["sales".to_string()])
            .min_success_count(1);
        let found = store.search(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, sales.id());

        let none = store
            .search(&KnowledgeFilter::new(20).min_success_count(5))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_feedback_and_cleanup() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = SqliteKnowledgeStore::open_in_memory_with_clock(clock.clone()).unwrap();
        let stale = store
            .upsert(NewKnowledge::new(Dialect::Sql, "flaky question", "SELECT 1", ""))
            .await
            .unwrap();
        let healthy = store
            .upsert(NewKnowledge::new(Dialect::Sql, "solid question", "SELECT 2", ""))
            .await
            .unwrap();

        store.record_feedback(stale.id(), false).await.unwrap();
        store.record_feedback(stale.id(), false).await.unwrap();
        store.record_feedback(healthy.id(), true).await.unwrap();
        assert!(store.record_feedback(999, true).await.is_err());

        clock.advance_secs(91 * 24 * 3600);
        assert_eq!(store.cleanup(90).await.unwrap(), 1);

        let remaining = store.all(None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, healthy.id());
    }

    #[tokio::test]
    async fn test_analytics_and_popular() {
        let store = SqliteKnowledgeStore::open_in_memory().unwrap();
        let hot = store
            .upsert(NewKnowledge::new(Dialect::Sql, "revenue by month", "SELECT 1", ""))
            .await
            .unwrap();
        for _ in 0..5 {
            store.record_feedback(hot.id(), true).await.unwrap();
        }
        store
            .upsert(NewKnowledge::new(Dialect::Dax, "list products", "EVALUATE 'Product'", ""))
            .await
            .unwrap();

        let analytics = store.analytics().await.unwrap();
        assert_eq!(analytics.total_entries, 2);
        assert_eq!(analytics.unique_categories, 2);
        assert_eq!(analytics.max_success_count, 6);
        assert_eq!(analytics.highly_successful, 1);
        assert_eq!(analytics.average_success_count, 3.5);
        assert_eq!(analytics.recent_activity.len(), 1);
        assert_eq!(analytics.recent_activity[0].queries_added, 2);

        let popular = store.popular(None, 1).await.unwrap();
        assert_eq!(popular[0].id, hot.id());
    }

    #[tokio::test]
    async fn test_export_import_between_stores() {
        let source = SqliteKnowledgeStore::open_in_memory().unwrap();
        source
            .upsert(NewKnowledge::new(Dialect::Sql, "total sales", "SELECT 1", "a").with_context("yearly"))
            .await
            .unwrap();
        source
            .upsert(NewKnowledge::new(Dialect::Dax, "list products", "EVALUATE 'Product'", "b"))
            .await
            .unwrap();

        let snapshot = source.export(Some(Dialect::Sql)).await.unwrap();
        assert_eq!(snapshot.total, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: crate::knowledge::KnowledgeExport = serde_json::from_str(&json).unwrap();

        let target = SqliteKnowledgeStore::open_in_memory().unwrap();
        let report = target.import(restored).await.unwrap();
        assert_eq!(report.imported, 1);
        assert!(report.errors.is_empty());

        let entries = target.all(None).await.unwrap();
        assert_eq!(entries[0].context.as_deref(), Some("yearly"));
    }
}
