//! Natural-language narration of a successful result.

use super::prompts::build_answer_prompt;
use crate::backend::ExecutionOutcome;
use crate::llm::CompletionProvider;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

const SAMPLE_ROWS: usize = 3;

pub struct AnswerNarrator {
    provider: Arc<dyn CompletionProvider>,
}

impl AnswerNarrator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Model-written answer, or a plain summary when the model is unavailable
    pub async fn narrate(&self, question: &str, query: &str, outcome: &ExecutionOutcome) -> String {
        let columns = result_columns(outcome);
        let sample = sample_rows(outcome);
        let prompt = build_answer_prompt(question, query, outcome.row_count, &columns, &sample);

        match self.provider.complete(&prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => fallback_summary(question, outcome),
            Err(e) => {
                error!("Failed to generate contextual answer: {}", e);
                fallback_summary(question, outcome)
            }
        }
    }
}

fn result_columns(outcome: &ExecutionOutcome) -> Vec<String> {
    if !outcome.columns.is_empty() {
        return outcome.columns.clone();
    }
    outcome
        .data
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

fn sample_rows(outcome: &ExecutionOutcome) -> Value {
    Value::Array(
        outcome
            .data
            .iter()
            .take(SAMPLE_ROWS)
            .cloned()
            .map(Value::Object)
            .collect(),
    )
}

/// Summary built from the result alone
pub fn fallback_summary(question: &str, outcome: &ExecutionOutcome) -> String {
    match outcome.row_count {
        0 => format!(
            "I couldn't find any data matching your question '{}'. This might mean the data doesn't exist in the current dataset or the criteria were too specific.",
            question
        ),
        1 => format!(
            "I found one result for your question. Here's what the data shows: {}",
            outcome
                .data
                .first()
                .map(|row| Value::Object(row.clone()).to_string())
                .unwrap_or_default()
        ),
        n => format!(
            "I found {} results for your question. The data includes columns: {}. Here are the first few results: {}",
            n,
            result_columns(outcome).join(", "),
            sample_rows(outcome)
        ),
    }
}
