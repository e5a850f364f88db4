mod common;

use common::{harness, year_totals, ScriptedBackend, ScriptedCompletion};
use nlq_engine::clock::SystemClock;
use nlq_engine::knowledge::question_hash;
use nlq_engine::{AnswerRequest, Dialect, Outcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const QUESTION: &str = "What were total sales by year?";
const QUERY: &str = "SELECT TOP 100 YEAR(OrderDate) AS Year, SUM(Amount) AS Total FROM Sales GROUP BY YEAR(OrderDate)";

#[tokio::test]
async fn test_successful_answer_is_remembered_once() {
    let provider = ScriptedCompletion::new(&[QUERY, QUERY]);
    let backend = ScriptedBackend::new(Dialect::Sql, |_, _| year_totals());
    let h = harness(provider.clone(), backend, Arc::new(SystemClock));

    let first = h.engine.answer(AnswerRequest::new(QUESTION)).await;
    assert!(first.success);
    h.engine.wait_for_persistence().await;

    let entries = h.store.all(None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].question, QUESTION);
    assert_eq!(entries[0].category, Dialect::Sql);
    assert_eq!(entries[0].success_count, 1);
    assert_eq!(entries[0].metadata["row_count"], 2);

    let hash = question_hash(Dialect::Sql.category(), QUESTION);
    let exact = h.store.find_by_hash(&hash, Dialect::Sql, 5).await.unwrap();
    assert_eq!(exact.len(), 1);

    // Same question again: the prior answer is offered as a reference and
    // the stored entry is updated rather than duplicated
    let second = h.engine.answer(AnswerRequest::new(QUESTION)).await;
    assert!(second.success);
    assert!(second
        .thinking
        .iter()
        .any(|t| t == "Found 1 similar previous queries"));
    h.engine.wait_for_persistence().await;

    let prompts = provider.prompts();
    let generation_prompts: Vec<&String> = prompts
        .iter()
        .filter(|p| !p.starts_with("Convert this database query result"))
        .collect();
    assert_eq!(generation_prompts.len(), 2);
    assert!(!generation_prompts[0].contains("SIMILAR SUCCESSFUL QUERIES FOR REFERENCE"));
    assert!(generation_prompts[1].contains("SIMILAR SUCCESSFUL QUERIES FOR REFERENCE"));
    assert!(generation_prompts[1].contains(&format!("Previous Q: {}", QUESTION)));

    let entries = h.store.all(None).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].success_count, 2);
}

#[tokio::test]
async fn test_knowledge_is_scoped_by_dialect() {
    let provider = ScriptedCompletion::new(&[QUERY]);
    let backend = ScriptedBackend::new(Dialect::Sql, |_, _| year_totals());
    let h = harness(provider, backend, Arc::new(SystemClock));

    h.engine.answer(AnswerRequest::new(QUESTION)).await;
    h.engine.wait_for_persistence().await;

    assert_eq!(h.store.all(Some(Dialect::Sql)).await.unwrap().len(), 1);
    assert!(h.store.all(Some(Dialect::Dax)).await.unwrap().is_empty());
    let hash = question_hash(Dialect::Dax.category(), QUESTION);
    assert!(h.store.find_by_hash(&hash, Dialect::Dax, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let provider = ScriptedCompletion::new(&[QUERY]);
    let backend = ScriptedBackend::new(Dialect::Sql, |_, _| year_totals());
    let h = harness(provider.clone(), backend.clone(), Arc::new(SystemClock));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = h
        .engine
        .answer_with_cancellation(AnswerRequest::new(QUESTION), cancel)
        .await;

    assert_eq!(result.outcome, Outcome::Cancelled);
    assert!(!result.success);
    assert!(result.attempts.is_empty());
    assert!(result.query.is_none());
    assert!(provider.prompts().is_empty());
    assert!(backend.queries().is_empty());
    assert_eq!(h.discovery.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_during_execution() {
    let provider = ScriptedCompletion::new(&[QUERY]);
    let backend = ScriptedBackend::slow(Dialect::Sql, Duration::from_secs(30));
    let h = harness(provider, backend.clone(), Arc::new(SystemClock));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = h
        .engine
        .answer_with_cancellation(AnswerRequest::new(QUESTION), cancel)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.outcome, Outcome::Cancelled);
    assert_eq!(backend.queries().len(), 1);
    assert!(result.attempts.is_empty());
    assert_eq!(result.query.as_deref(), Some(QUERY));

    h.engine.wait_for_persistence().await;
    assert!(h.store.all(None).await.unwrap().is_empty());
}
