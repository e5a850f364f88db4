//! Query Generator
//!
//! Turns a question into a query through an ordered chain of strategies:
//! a templated prompt chosen from the question analysis, then a plain
//! prompt, then a deterministic query over the highest-priority table.
//! The first strategy that yields a non-empty query wins.

use super::cleaner::{clean_completion, optimize_for_analysis};
use super::prompts::{build_generation_prompt, build_simple_prompt, PromptSections, PromptTemplate};
use crate::dialect::Dialect;
use crate::knowledge::KnowledgeMatch;
use crate::llm::CompletionProvider;
use crate::schema::SchemaContext;
use crate::semantic::QuestionAnalysis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", content = "template", rename_all = "snake_case")]
pub enum GenerationStrategy {
    Advanced(PromptTemplate),
    Simple,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub query: String,
    pub strategy: GenerationStrategy,
}

/// Everything the generator reads for one question
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub schema: &'a SchemaContext,
    pub analysis: &'a QuestionAnalysis,
    pub history: &'a [String],
    pub similar: &'a [KnowledgeMatch],
}

pub struct QueryGenerator {
    provider: Arc<dyn CompletionProvider>,
}

impl QueryGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    pub async fn generate(&self, request: &GenerationRequest<'_>) -> GeneratedQuery {
        let dialect = request.schema.dialect;

        let template = PromptTemplate::select(request.analysis, dialect);
        let sections = PromptSections::build(request.history, request.similar, request.analysis);
        let prompt = build_generation_prompt(template, request.question, request.schema, &sections, request.analysis);
        if let Some(query) = self.complete(&prompt, dialect).await {
            let query = optimize_for_analysis(&query, dialect, request.analysis);
            info!(
                "Generated {} query ({} chars) using template '{}'",
                dialect.language(),
                query.len(),
                template.name()
            );
            return GeneratedQuery {
                query,
                strategy: GenerationStrategy::Advanced(template),
            };
        }

        warn!("Templated generation produced no query, retrying with a plain prompt");
        let prompt = build_simple_prompt(request.question, request.schema);
        if let Some(query) = self.complete(&prompt, dialect).await {
            return GeneratedQuery {
                query,
                strategy: GenerationStrategy::Simple,
            };
        }

        warn!("Plain generation produced no query, using fallback query");
        GeneratedQuery {
            query: fallback_query(request.schema),
            strategy: GenerationStrategy::Fallback,
        }
    }

    /// Cleaned completion, or `None` when the provider failed or returned nothing usable
    async fn complete(&self, prompt: &str, dialect: Dialect) -> Option<String> {
        match self.provider.complete(prompt).await {
            Ok(response) => {
                let query = clean_completion(&response, dialect);
                (!query.is_empty()).then_some(query)
            }
            Err(e) => {
                warn!("Query generation failed: {}", e);
                None
            }
        }
    }
}

/// Deterministic query over the highest-priority table
pub fn fallback_query(schema: &SchemaContext) -> String {
    match (schema.dialect, schema.vocabulary.first_table()) {
        (Dialect::Sql, Some(table)) => format!("SELECT TOP 10 * FROM [{}]", table),
        (Dialect::Sql, None) => "SELECT TOP 10 * FROM INFORMATION_SCHEMA.TABLES".to_string(),
        (Dialect::Dax, Some(table)) => format!("EVALUATE\nTOPN(10, '{}')", table),
        (Dialect::Dax, None) => "EVALUATE INFO.TABLES()".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ColumnSchema, DiscoveredSchema};
    use crate::error::{EngineError, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Replies(Mutex<Vec<Result<String>>>);

    impl Replies {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(replies.into_iter().rev().collect())))
        }
    }

    #[async_trait]
    impl CompletionProvider for Replies {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(EngineError::Provider("no reply scripted".to_string())))
        }
    }

    fn schema(dialect: Dialect) -> SchemaContext {
        let discovered = DiscoveredSchema::default()
            .with_table("AuditLog", vec![ColumnSchema::new("Id", "int")])
            .with_table(
                "Sales",
                vec![ColumnSchema::new("OrderDate", "date"), ColumnSchema::new("Amount", "decimal")],
            );
        SchemaContext::build(dialect, &discovered)
    }

    async fn run(provider: Arc<Replies>, dialect: Dialect) -> GeneratedQuery {
        let schema = schema(dialect);
        let analysis = QuestionAnalysis::analyze("What were total sales by year?");
        let generator = QueryGenerator::new(provider);
        generator
            .generate(&GenerationRequest {
                question: "What were total sales by year?",
                schema: &schema,
                analysis: &analysis,
                history: &[],
                similar: &[],
            })
            .await
    }

    #[tokio::test]
    async fn test_advanced_strategy_cleans_completion() {
        let provider = Replies::new(vec![Ok(
            "```sql\nSELECT YEAR(OrderDate) AS Year, SUM(Amount) AS Total FROM Sales GROUP BY YEAR(OrderDate)\n```"
                .to_string(),
        )]);
        let generated = run(provider, Dialect::Sql).await;
        assert_eq!(
            generated.strategy,
            GenerationStrategy::Advanced(PromptTemplate::SqlAggregationFocused)
        );
        assert!(generated.query.starts_with("SELECT TOP 100 YEAR(OrderDate)"));
    }

    #[tokio::test]
    async fn test_empty_completion_falls_through_to_simple() {
        let provider = Replies::new(vec![Ok("```\n```".to_string()), Ok("SELECT TOP 5 Amount FROM Sales".to_string())]);
        let generated = run(provider, Dialect::Sql).await;
        assert_eq!(generated.strategy, GenerationStrategy::Simple);
        assert_eq!(generated.query, "SELECT TOP 5 Amount FROM Sales");
    }

    #[tokio::test]
    async fn test_provider_failures_use_fallback_on_priority_table() {
        let generated = run(Replies::new(vec![]), Dialect::Sql).await;
        assert_eq!(generated.strategy, GenerationStrategy::Fallback);
        assert_eq!(generated.query, "SELECT TOP 10 * FROM [Sales]");

        let generated = run(Replies::new(vec![]), Dialect::Dax).await;
        assert_eq!(generated.query, "EVALUATE\nTOPN(10, 'Sales')");
    }

    #[test]
    fn test_fallback_without_schema() {
        assert_eq!(
            fallback_query(&SchemaContext::unavailable(Dialect::Sql)),
            "SELECT TOP 10 * FROM INFORMATION_SCHEMA.TABLES"
        );
    }
}
