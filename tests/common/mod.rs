//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use nlq_engine::backend::{
    ColumnSchema, DiscoveredSchema, ExecutionBackend, ExecutionOutcome, Row, SchemaDiscovery,
};
use nlq_engine::clock::Clock;
use nlq_engine::knowledge::{KnowledgeSearch, KnowledgeStore, SqliteKnowledgeStore};
use nlq_engine::llm::CompletionProvider;
use nlq_engine::{Dialect, EngineConfig, EngineError, Result, SelfCorrectionEngine};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NARRATION_PROMPT: &str = "Convert this database query result";

/// Answers query prompts from a script, in order, failing once the script
/// runs out. Narration prompts get `narration` when set and fail otherwise.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    narration: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            narration: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn narrating(replies: &[&str], narration: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            narration: Some(narration.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with(NARRATION_PROMPT) {
            return self
                .narration
                .clone()
                .ok_or_else(|| EngineError::Provider("narration unavailable".to_string()));
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Provider("script exhausted".to_string()))
    }
}

type Responder = Box<dyn Fn(usize, &str) -> ExecutionOutcome + Send + Sync>;

/// Backend whose answer is computed from the call index and the query text
pub struct ScriptedBackend {
    dialect: Dialect,
    respond: Responder,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(
        dialect: Dialect,
        respond: impl Fn(usize, &str) -> ExecutionOutcome + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            dialect,
            respond: Box::new(respond),
            delay: None,
            queries: Mutex::new(Vec::new()),
        })
    }

    /// Backend that takes `delay` to answer every query
    pub fn slow(dialect: Dialect, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            dialect,
            respond: Box::new(|_, _| ExecutionOutcome::rows(vec!["n".to_string()], year_rows())),
            delay: Some(delay),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, query: &str) -> Result<ExecutionOutcome> {
        let index = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(query.to_string());
            queries.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok((self.respond)(index, query))
    }
}

/// Schema discovery returning a fixed schema and counting calls
pub struct StaticSchema {
    schema: DiscoveredSchema,
    calls: AtomicUsize,
}

impl StaticSchema {
    pub fn sales() -> Arc<Self> {
        Arc::new(Self {
            schema: sales_schema(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaDiscovery for StaticSchema {
    async fn discover(&self) -> Result<DiscoveredSchema> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.schema.clone())
    }
}

pub fn sales_schema() -> DiscoveredSchema {
    DiscoveredSchema::default()
        .with_table(
            "Sales",
            vec![
                ColumnSchema::new("OrderDate", "date"),
                ColumnSchema::new("Amount", "decimal"),
                ColumnSchema::new("CustomerID", "int"),
            ],
        )
        .with_table(
            "Customers",
            vec![ColumnSchema::new("CustomerID", "int"), ColumnSchema::new("Name", "nvarchar")],
        )
}

pub fn year_rows() -> Vec<Row> {
    [(2023, 1250.5), (2024, 1410.0)]
        .iter()
        .filter_map(|(year, total)| serde_json::json!({ "Year": year, "Total": total }).as_object().cloned())
        .collect()
}

pub fn year_totals() -> ExecutionOutcome {
    ExecutionOutcome::rows(vec!["Year".to_string(), "Total".to_string()], year_rows())
}

pub struct Harness {
    pub engine: SelfCorrectionEngine,
    pub store: Arc<dyn KnowledgeStore>,
    pub discovery: Arc<StaticSchema>,
}

pub fn harness(
    provider: Arc<ScriptedCompletion>,
    backend: Arc<ScriptedBackend>,
    clock: Arc<dyn Clock>,
) -> Harness {
    let config = EngineConfig::default();
    let store: Arc<dyn KnowledgeStore> =
        Arc::new(SqliteKnowledgeStore::open_in_memory_with_clock(Arc::clone(&clock)).unwrap());
    let knowledge = Arc::new(KnowledgeSearch::with_clock(
        Arc::clone(&store),
        config.search.clone(),
        Arc::clone(&clock),
    ));
    let discovery = StaticSchema::sales();
    let engine = SelfCorrectionEngine::with_clock(
        &config,
        provider,
        backend,
        discovery.clone(),
        knowledge,
        clock,
    );
    Harness {
        engine,
        store,
        discovery,
    }
}
