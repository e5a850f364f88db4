//! Self-Correction Engine
//!
//! Answers one question end to end: load the schema context (cached),
//! look up similar prior queries, generate a query, then validate and
//! execute it, classifying and repairing failures until the query runs or
//! the attempt bound is reached. Successful answers are written back to
//! the knowledge store in the background.
//!
//! The engine never returns an error for a request. Exhaustion,
//! cancellation and internal failures are all reported through
//! [`AnswerResult::outcome`] with the attempt trace attached.

use crate::backend::{ExecutionBackend, ExecutionOutcome, SchemaDiscovery};
use crate::cache::{CacheStats, MetadataCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, MAX_ATTEMPTS};
use crate::dialect::Dialect;
use crate::error::EngineError;
use crate::execution_loop::error_classifier::{ErrorCategory, ErrorClassifier};
use crate::execution_loop::error_recovery::{ErrorRecovery, FixRequest};
use crate::execution_loop::trace::{AnswerRequest, AnswerResult, QueryAttempt, Trace};
use crate::generation::{AnswerNarrator, GenerationRequest, QueryGenerator};
use crate::knowledge::{KnowledgeSearch, NewKnowledge};
use crate::llm::CompletionProvider;
use crate::safety_guardrails::SafetyValidator;
use crate::schema::SchemaContext;
use crate::semantic::QuestionAnalysis;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

const ERROR_PREVIEW_CHARS: usize = 100;

/// Resolve `future` unless `cancel` fires first
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

pub struct SelfCorrectionEngine {
    backend: Arc<dyn ExecutionBackend>,
    discovery: Arc<dyn SchemaDiscovery>,
    knowledge: Arc<KnowledgeSearch>,
    schema_cache: MetadataCache<SchemaContext>,
    generator: QueryGenerator,
    recovery: ErrorRecovery,
    narrator: AnswerNarrator,
    validator: SafetyValidator,
    classifier: ErrorClassifier,
    persistence: TaskTracker,
    max_attempts: u8,
    preview_rows: usize,
}

impl SelfCorrectionEngine {
    pub fn new(
        config: &EngineConfig,
        provider: Arc<dyn CompletionProvider>,
        backend: Arc<dyn ExecutionBackend>,
        discovery: Arc<dyn SchemaDiscovery>,
        knowledge: Arc<KnowledgeSearch>,
    ) -> Self {
        Self::with_clock(config, provider, backend, discovery, knowledge, Arc::new(SystemClock))
    }

    /// Engine whose schema cache reads time from `clock`
    pub fn with_clock(
        config: &EngineConfig,
        provider: Arc<dyn CompletionProvider>,
        backend: Arc<dyn ExecutionBackend>,
        discovery: Arc<dyn SchemaDiscovery>,
        knowledge: Arc<KnowledgeSearch>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            discovery,
            knowledge,
            schema_cache: MetadataCache::with_clock("schema", config.cache.clone(), clock),
            generator: QueryGenerator::new(Arc::clone(&provider)),
            recovery: ErrorRecovery::new(Arc::clone(&provider)),
            narrator: AnswerNarrator::new(provider),
            validator: SafetyValidator::new(),
            classifier: ErrorClassifier::new(),
            persistence: TaskTracker::new(),
            max_attempts: config.max_attempts.clamp(1, MAX_ATTEMPTS),
            preview_rows: config.preview_rows,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    /// Schema cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.schema_cache.stats()
    }

    pub fn knowledge_cache_stats(&self) -> CacheStats {
        self.knowledge.cache_stats()
    }

    /// Drop the cached schema so the next request rediscovers it
    pub fn refresh_schema(&self) -> bool {
        self.schema_cache.invalidate(&self.dialect().schema_cache_key())
    }

    /// Wait until every background knowledge write has finished
    pub async fn wait_for_persistence(&self) {
        self.persistence.close();
        self.persistence.wait().await;
        self.persistence.reopen();
    }

    pub async fn answer(&self, request: AnswerRequest) -> AnswerResult {
        self.answer_with_cancellation(request, CancellationToken::new()).await
    }

    /// Answer `request`, giving up with a cancelled outcome as soon as
    /// `cancel` fires
    pub async fn answer_with_cancellation(&self, request: AnswerRequest, cancel: CancellationToken) -> AnswerResult {
        let request_id = Uuid::new_v4();
        let dialect = self.dialect();
        let span = info_span!("answer", %request_id, %dialect);
        self.run(request, dialect, cancel).instrument(span).await
    }

    async fn run(&self, request: AnswerRequest, dialect: Dialect, cancel: CancellationToken) -> AnswerResult {
        let mut trace = Trace::start(dialect);
        let question = request.question.trim();
        if question.is_empty() {
            return trace.failed("Question is empty");
        }
        info!("Answering question: {}", question);

        trace.think("Analyzing question and preparing context...");
        let Some(schema) = until_cancelled(&cancel, self.schema_context(dialect)).await else {
            return trace.cancelled(None);
        };
        trace.think(format!("Schema loaded: {} ({} chars)", dialect.language(), schema.text.len()));

        trace.think("Checking knowledge base for similar questions...");
        let Some(similar) = until_cancelled(&cancel, self.knowledge.search(question, dialect)).await else {
            return trace.cancelled(None);
        };
        if similar.is_empty() {
            trace.think("No similar queries found - generating fresh approach");
        } else {
            trace.think(format!("Found {} similar previous queries", similar.len()));
        }

        trace.think(format!("Generating optimized {} query...", dialect.language()));
        let analysis = QuestionAnalysis::analyze(question);
        let generation = GenerationRequest {
            question,
            schema: &schema,
            analysis: &analysis,
            history: &request.context_history,
            similar: &similar,
        };
        let Some(generated) = until_cancelled(&cancel, self.generator.generate(&generation)).await else {
            return trace.cancelled(None);
        };
        info!(strategy = ?generated.strategy, "Generated initial query");
        trace.think(format!("Generated {} character query", generated.query.len()));

        let mut current = generated.query;
        for attempt_number in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return trace.cancelled(Some(current));
            }
            trace.think(format!(
                "Executing query (attempt {}/{})...",
                attempt_number, self.max_attempts
            ));

            let started = Instant::now();
            let validation = self.validator.validate(&current, dialect, &request.validation);
            let outcome = if validation.safe {
                let Some(result) = until_cancelled(&cancel, self.backend.execute(&current)).await else {
                    return trace.cancelled(Some(current));
                };
                result.unwrap_or_else(|e| {
                    warn!("Backend call failed: {}", e);
                    ExecutionOutcome::failed(e.to_string())
                })
            } else {
                warn!(
                    "Attempt {} rejected by validation: {}",
                    attempt_number,
                    validation.reason_or_default()
                );
                ExecutionOutcome::failed(format!("Query validation failed: {}", validation.reason_or_default()))
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            if outcome.success {
                info!("Attempt {} succeeded with {} rows", attempt_number, outcome.row_count);
                trace.record(QueryAttempt {
                    query_text: current.clone(),
                    attempt_number,
                    success: true,
                    error: None,
                    error_category: None,
                    duration_ms,
                    row_count: outcome.row_count,
                });
                trace.think(format!(
                    "Success! Found {} rows in {:.2}s",
                    outcome.row_count,
                    duration_ms as f64 / 1000.0
                ));

                trace.think("Crafting natural language response...");
                let Some(answer) = until_cancelled(&cancel, self.narrator.narrate(question, &current, &outcome)).await
                else {
                    return trace.cancelled(Some(current));
                };
                self.persist(question, dialect, &current, &answer, &outcome, duration_ms);
                return trace.succeeded(answer, current, outcome, self.preview_rows);
            }

            let raw_error = outcome.error.unwrap_or_default();
            let category = if validation.safe {
                self.classifier.classify(&raw_error)
            } else {
                ErrorCategory::SyntaxError
            };
            let error = if raw_error.trim().is_empty() {
                "Unknown execution error".to_string()
            } else {
                raw_error
            };
            warn!("Attempt {} failed ({}): {}", attempt_number, category, error);
            trace.record(QueryAttempt {
                query_text: current.clone(),
                attempt_number,
                success: false,
                error: Some(error.clone()),
                error_category: Some(category),
                duration_ms,
                row_count: 0,
            });
            trace.think(format!(
                "{}: {}",
                category,
                error.chars().take(ERROR_PREVIEW_CHARS).collect::<String>()
            ));

            if attempt_number < self.max_attempts {
                trace.think(format!("Applying {} fix strategy...", category));
                let fix_request = FixRequest {
                    failed_query: &current,
                    error: &error,
                    category,
                    schema: &schema,
                };
                let Some(fix) = until_cancelled(&cancel, self.recovery.fix(&fix_request)).await else {
                    return trace.cancelled(Some(current));
                };
                info!(strategy = ?fix.strategy, "Applied {} fix", category);
                trace.think("Generated corrected query");
                current = fix.query;
            }
        }

        warn!("Exhausted {} attempts", self.max_attempts);
        trace.exhausted(self.max_attempts, Some(current))
    }

    /// Cached schema context, or the fallback placeholder when discovery fails
    async fn schema_context(&self, dialect: Dialect) -> SchemaContext {
        let key = dialect.schema_cache_key();
        let discovery = &self.discovery;
        let fetched = self
            .schema_cache
            .get_or_fetch(&key, || async move {
                let discovered = discovery.discover().await?;
                if !discovered.success {
                    return Err(EngineError::Schema(
                        discovered
                            .error
                            .unwrap_or_else(|| "schema discovery reported failure".to_string()),
                    ));
                }
                Ok(SchemaContext::build(dialect, &discovered))
            })
            .await;

        fetched.unwrap_or_else(|e| {
            warn!("Schema unavailable, continuing in fallback mode: {}", e);
            SchemaContext::unavailable(dialect)
        })
    }

    /// Record a successful answer without holding up the response
    fn persist(
        &self,
        question: &str,
        dialect: Dialect,
        query: &str,
        answer: &str,
        outcome: &ExecutionOutcome,
        duration_ms: u64,
    ) {
        let entry = NewKnowledge::new(dialect, question, query, answer)
            .with_context(format!("Successfully answered with {} results", outcome.row_count))
            .with_metadata(serde_json::json!({
                "row_count": outcome.row_count,
                "execution_time": duration_ms as f64 / 1000.0,
                "success": true,
            }));
        let knowledge = Arc::clone(&self.knowledge);

        self.persistence.spawn(
            async move {
                match knowledge.record_success(entry).await {
                    Ok(action) => info!("Added successful query to knowledge base ({:?})", action),
                    Err(e) => warn!("Failed to update knowledge base: {}", e),
                }
            }
            .in_current_span(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DiscoveredSchema;
    use crate::error::Result;
    use crate::knowledge::SqliteKnowledgeStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str);

    #[async_trait]
    impl CompletionProvider for Fixed {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionBackend for CountingBackend {
        fn dialect(&self) -> Dialect {
            Dialect::Sql
        }

        async fn execute(&self, _query: &str) -> Result<ExecutionOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionOutcome::failed("Connection reset by peer"))
        }
    }

    struct BrokenDiscovery;

    #[async_trait]
    impl SchemaDiscovery for BrokenDiscovery {
        async fn discover(&self) -> Result<DiscoveredSchema> {
            Err(EngineError::Schema("metadata endpoint down".to_string()))
        }
    }

    fn engine(reply: &'static str, backend: Arc<CountingBackend>) -> SelfCorrectionEngine {
        let config = EngineConfig::default();
        let store = Arc::new(SqliteKnowledgeStore::open_in_memory().unwrap());
        let knowledge = Arc::new(KnowledgeSearch::new(store, config.search.clone()));
        SelfCorrectionEngine::new(&config, Arc::new(Fixed(reply)), backend, Arc::new(BrokenDiscovery), knowledge)
    }

    #[tokio::test]
    async fn test_unsafe_queries_never_reach_backend() {
        let backend = Arc::new(CountingBackend::default());
        let engine = engine("DROP TABLE Sales", Arc::clone(&backend));
        let result = engine.answer(AnswerRequest::new("Remove all sales")).await;

        assert_eq!(result.attempts.len(), 3);
        assert!(result
            .attempts
            .iter()
            .all(|a| a.error_category == Some(ErrorCategory::SyntaxError)));
        assert_eq!(
            result.attempts[0].error.as_deref(),
            Some("Query validation failed: Dangerous operation detected: DROP")
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schema_failure_uses_fallback_and_is_not_cached() {
        let backend = Arc::new(CountingBackend::default());
        let engine = engine("SELECT TOP 5 Name FROM Customers", Arc::clone(&backend));
        let result = engine.answer(AnswerRequest::new("List customers")).await;

        assert!(result.thinking.iter().any(|t| t.contains("Schema loaded: T-SQL (40 chars)")));
        assert_eq!(engine.cache_stats().size, 0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_blank_question_fails_fast() {
        let backend = Arc::new(CountingBackend::default());
        let engine = engine("SELECT 1", Arc::clone(&backend));
        let result = engine.answer(AnswerRequest::new("   ")).await;
        assert_eq!(result.outcome, crate::execution_loop::Outcome::Failed);
        assert!(result.attempts.is_empty());
    }
}
