//! Attempt trace and the result returned to callers.

use crate::backend::{ExecutionOutcome, Row};
use crate::dialect::Dialect;
use crate::error::{EngineError, Result};
use crate::execution_loop::error_classifier::ErrorCategory;
use crate::safety_guardrails::ValidationContext;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One execution attempt in the self-correction loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAttempt {
    pub query_text: String,
    /// 1-based
    pub attempt_number: u8,
    pub success: bool,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub duration_ms: u64,
    pub row_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Exhausted,
    Cancelled,
    Failed,
}

/// A question to answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    /// Earlier turns of the conversation, oldest first
    #[serde(default)]
    pub context_history: Vec<String>,
    #[serde(default)]
    pub validation: ValidationContext,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.context_history = history;
        self
    }

    pub fn with_validation(mut self, validation: ValidationContext) -> Self {
        self.validation = validation;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub success: bool,
    pub answer: String,
    pub query: Option<String>,
    pub attempts: Vec<QueryAttempt>,
    pub execution_time_ms: u64,
    pub dialect: Dialect,
    pub columns: Vec<String>,
    /// Leading rows of the result
    pub data: Vec<Row>,
    pub total_rows: usize,
    /// Ordered progress log
    pub thinking: Vec<String>,
    pub outcome: Outcome,
    pub error_details: Option<String>,
}

impl AnswerResult {
    /// The answer text, or the error matching a non-success outcome
    pub fn into_answer(self) -> Result<String> {
        match self.outcome {
            Outcome::Success => Ok(self.answer),
            Outcome::Exhausted => Err(EngineError::Exhausted(self.attempts.len() as u8)),
            Outcome::Cancelled => Err(EngineError::Cancelled),
            Outcome::Failed => Err(EngineError::Execution(self.error_details.unwrap_or(self.answer))),
        }
    }
}

/// Accumulates progress for one request and builds its [`AnswerResult`]
pub struct Trace {
    dialect: Dialect,
    started: Instant,
    thinking: Vec<String>,
    attempts: Vec<QueryAttempt>,
}

impl Trace {
    pub fn start(dialect: Dialect) -> Self {
        Self {
            dialect,
            started: Instant::now(),
            thinking: Vec::new(),
            attempts: Vec::new(),
        }
    }

    pub fn think(&mut self, step: impl Into<String>) {
        self.thinking.push(step.into());
    }

    pub fn record(&mut self, attempt: QueryAttempt) {
        self.attempts.push(attempt);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn finish(self, outcome: Outcome, answer: String, query: Option<String>) -> AnswerResult {
        AnswerResult {
            success: outcome == Outcome::Success,
            answer,
            query,
            execution_time_ms: self.elapsed_ms(),
            attempts: self.attempts,
            dialect: self.dialect,
            columns: Vec::new(),
            data: Vec::new(),
            total_rows: 0,
            thinking: self.thinking,
            outcome,
            error_details: None,
        }
    }

    pub fn succeeded(
        mut self,
        answer: String,
        query: String,
        result: ExecutionOutcome,
        preview_rows: usize,
    ) -> AnswerResult {
        self.think(format!("Analysis complete in {:.2}s", self.elapsed_ms() as f64 / 1000.0));
        let total_rows = result.row_count.max(result.data.len());
        let mut data = result.data;
        data.truncate(preview_rows);

        AnswerResult {
            columns: result.columns,
            data,
            total_rows,
            ..self.finish(Outcome::Success, answer, Some(query))
        }
    }

    pub fn exhausted(mut self, max_attempts: u8, query: Option<String>) -> AnswerResult {
        self.think("Reached maximum attempts - unable to fix query");
        let answer = format!(
            "After {} attempts, I couldn't generate a working {} query. This might be due to data structure limitations or the complexity of your question. Please try rephrasing or asking about different data.",
            max_attempts,
            self.dialect.language()
        );
        let last_error = self.attempts.last().and_then(|a| a.error.clone());
        AnswerResult {
            error_details: last_error,
            ..self.finish(Outcome::Exhausted, answer, query)
        }
    }

    pub fn cancelled(mut self, query: Option<String>) -> AnswerResult {
        self.think("Request cancelled");
        AnswerResult {
            error_details: Some("cancelled".to_string()),
            ..self.finish(
                Outcome::Cancelled,
                "The request was cancelled before an answer was produced.".to_string(),
                query,
            )
        }
    }

    pub fn failed(mut self, details: impl Into<String>) -> AnswerResult {
        let details = details.into();
        self.think(format!("Critical error: {}", details));
        AnswerResult {
            error_details: Some(details),
            ..self.finish(
                Outcome::Failed,
                "An internal error occurred during analysis. Please try again with a simpler question.".to_string(),
                None,
            )
        }
    }
}
