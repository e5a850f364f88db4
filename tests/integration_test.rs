mod common;

use common::{harness, year_totals, ScriptedBackend, ScriptedCompletion};
use nlq_engine::backend::ExecutionOutcome;
use nlq_engine::clock::{ManualClock, SystemClock};
use nlq_engine::execution_loop::ErrorCategory;
use nlq_engine::{AnswerRequest, Dialect, Outcome};
use std::sync::Arc;

const YEARLY_SALES: &str = "What were total sales by year?";

#[tokio::test]
async fn test_answers_on_first_attempt() {
    let provider = ScriptedCompletion::narrating(
        &["SELECT YEAR(OrderDate) AS Year, SUM(Amount) AS Total FROM Sales GROUP BY YEAR(OrderDate)"],
        "Sales grew from 1,250.50 in 2023 to 1,410.00 in 2024.",
    );
    let backend = ScriptedBackend::new(Dialect::Sql, |_, _| year_totals());
    let h = harness(provider.clone(), backend.clone(), Arc::new(SystemClock));

    let result = h.engine.answer(AnswerRequest::new(YEARLY_SALES)).await;

    assert!(result.success);
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.attempts.len(), 1);
    assert!(result.attempts[0].success);
    assert_eq!(result.attempts[0].attempt_number, 1);
    assert_eq!(result.answer, "Sales grew from 1,250.50 in 2023 to 1,410.00 in 2024.");
    assert_eq!(result.columns, vec!["Year".to_string(), "Total".to_string()]);
    assert_eq!(result.total_rows, 2);
    assert_eq!(result.dialect, Dialect::Sql);

    let executed = backend.queries();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].contains("TOP 100"));
    assert!(executed[0].contains("SUM(Amount)"));
    assert_eq!(result.query.as_deref(), Some(executed[0].as_str()));
    assert!(result.thinking.iter().any(|t| t == "Executing query (attempt 1/3)..."));
}

#[tokio::test]
async fn test_schema_error_repaired_on_second_attempt() {
    let provider = ScriptedCompletion::new(&[
        "```sql\nSELECT YEAR(OrderDate) AS Year, SUM(Amout) AS Total FROM Sales GROUP BY YEAR(OrderDate)\n```",
    ]);
    let backend = ScriptedBackend::new(Dialect::Sql, |_, query| {
        if query.contains("Amout") {
            ExecutionOutcome::failed("Invalid column name 'Amout'.")
        } else {
            year_totals()
        }
    });
    let h = harness(provider.clone(), backend.clone(), Arc::new(SystemClock));

    let result = h.engine.answer(AnswerRequest::new(YEARLY_SALES)).await;

    assert!(result.success);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.attempts[0].error_category, Some(ErrorCategory::SchemaError));
    assert_eq!(result.attempts[0].error.as_deref(), Some("Invalid column name 'Amout'."));
    assert!(result.attempts[1].success);

    let query = result.query.expect("successful query");
    assert!(query.contains("SUM(Amount)"));
    assert!(!query.contains("Amout"));

    // Generation plus narration; the repair itself needs no model call
    assert_eq!(provider.prompts().len(), 2);
    // Narration failed, so the answer is the plain summary
    assert!(result.answer.starts_with("I found 2 results for your question."));
}

#[tokio::test]
async fn test_unrelated_errors_exhaust_attempts() {
    let provider = ScriptedCompletion::new(&[
        "SELECT TOP 10 Name FROM Customers",
        "SELECT TOP 10 Name, CustomerID FROM Customers",
        "SELECT TOP 10 CustomerID FROM Customers",
    ]);
    let errors = [
        "Connection reset by peer",
        "Arithmetic overflow error converting expression to data type int.",
        "Incorrect syntax near 'FROM'.",
    ];
    let backend = ScriptedBackend::new(Dialect::Sql, move |index, _| ExecutionOutcome::failed(errors[index]));
    let h = harness(provider.clone(), backend.clone(), Arc::new(SystemClock));

    let result = h.engine.answer(AnswerRequest::new("List customer names")).await;

    assert!(!result.success);
    assert_eq!(result.outcome, Outcome::Exhausted);
    assert_eq!(result.attempts.len(), 3);
    let numbers: Vec<u8> = result.attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let categories: Vec<_> = result.attempts.iter().filter_map(|a| a.error_category).collect();
    assert_eq!(
        categories,
        vec![
            ErrorCategory::GeneralError,
            ErrorCategory::CalculationError,
            ErrorCategory::SyntaxError
        ]
    );
    assert_eq!(result.error_details.as_deref(), Some("Incorrect syntax near 'FROM'."));
    assert!(result
        .answer
        .starts_with("After 3 attempts, I couldn't generate a working T-SQL query."));
    assert_eq!(result.query.as_deref(), Some("SELECT TOP 10 CustomerID FROM Customers"));
    assert_eq!(backend.queries().len(), 3);

    // Nothing failed is remembered
    h.engine.wait_for_persistence().await;
    assert!(h.store.all(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_schema_cached_until_expiry() {
    let query = "SELECT TOP 10 Name FROM Customers";
    let provider = ScriptedCompletion::new(&[query, query, query]);
    let backend = ScriptedBackend::new(Dialect::Sql, |_, _| year_totals());
    let clock = Arc::new(ManualClock::starting_now());
    let h = harness(provider, backend, clock.clone());

    h.engine.answer(AnswerRequest::new("List customer names")).await;
    h.engine.answer(AnswerRequest::new("List customer names")).await;
    assert_eq!(h.discovery.calls(), 1);
    let stats = h.engine.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.size, 1);

    clock.advance_secs(3601);
    let result = h.engine.answer(AnswerRequest::new("List customer names")).await;
    assert!(result.success);
    assert_eq!(h.discovery.calls(), 2);
    assert_eq!(h.engine.cache_stats().expirations, 1);
}

#[tokio::test]
async fn test_refresh_schema_forces_rediscovery() {
    let query = "SELECT TOP 10 Name FROM Customers";
    let provider = ScriptedCompletion::new(&[query, query]);
    let backend = ScriptedBackend::new(Dialect::Sql, |_, _| year_totals());
    let h = harness(provider, backend, Arc::new(SystemClock));

    h.engine.answer(AnswerRequest::new("List customer names")).await;
    assert!(h.engine.refresh_schema());
    h.engine.answer(AnswerRequest::new("List customer names")).await;
    assert_eq!(h.discovery.calls(), 2);
}

#[tokio::test]
async fn test_dax_backend_gets_dax_queries() {
    let provider = ScriptedCompletion::new(&["SUMMARIZECOLUMNS('Sales'[OrderDate], \"Total\", SUM('Sales'[Amount]))"]);
    let backend = ScriptedBackend::new(Dialect::Dax, |_, _| year_totals());
    let h = harness(provider, backend.clone(), Arc::new(SystemClock));

    let result = h.engine.answer(AnswerRequest::new(YEARLY_SALES)).await;

    assert!(result.success);
    assert_eq!(result.dialect, Dialect::Dax);
    let executed = backend.queries();
    assert!(executed[0].starts_with("EVALUATE"));
    assert!(result.thinking.iter().any(|t| t.starts_with("Schema loaded: DAX")));
}
