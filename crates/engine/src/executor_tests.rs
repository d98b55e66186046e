//! Tests for the step executor.
//!
//! Adapters are `MockAdapter`s and the workflow store is the in-memory one,
//! so no Postgres connection is required.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use adapters::mock::MockAdapter;
use adapters::AdapterRegistry;

use crate::executor::{ExecutorConfig, StepExecutor};
use crate::models::{Action, ActionResult, ExecutionOutcome, ExecutionStatus, JobPayload, Trigger, Workflow};
use crate::store::{InMemoryStore, WorkflowStore};
use crate::EngineError;

fn executor(registry: AdapterRegistry, store: Arc<InMemoryStore>) -> StepExecutor {
    StepExecutor::new(Arc::new(registry), store, ExecutorConfig::default())
}

async fn stored_workflow(store: &InMemoryStore, actions: Vec<Action>) -> Workflow {
    let workflow = Workflow::new("test", Uuid::new_v4(), Trigger::Manual, actions);
    store.insert_workflow(workflow.clone()).await;
    workflow
}

fn payload(workflow: &Workflow) -> JobPayload {
    JobPayload::for_execution(workflow, Uuid::new_v4())
}

fn outcome_summary(results: &[ActionResult]) -> Vec<(String, bool)> {
    results
        .iter()
        .map(|r| (r.action_type.clone(), r.success))
        .collect()
}

// ============================================================
// Ordering
// ============================================================

#[tokio::test(start_paused = true)]
async fn results_follow_action_order_regardless_of_latency() {
    let registry = AdapterRegistry::new()
        .with("slow", Arc::new(MockAdapter::delayed(Duration::from_millis(300), json!("A"))))
        .with("medium", Arc::new(MockAdapter::delayed(Duration::from_millis(100), json!("B"))))
        .with("fast", Arc::new(MockAdapter::returning(json!("C"))));
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(
        &store,
        vec![
            Action::new("slow", json!({})),
            Action::new("medium", json!({})),
            Action::new("fast", json!({})),
        ],
    )
    .await;

    let outcome = executor(registry, store).run(&payload(&workflow), 1).await.unwrap();

    let values: Vec<Value> = outcome
        .results()
        .iter()
        .map(|r| r.result.clone().unwrap())
        .collect();
    assert_eq!(values, vec![json!("A"), json!("B"), json!("C")]);
}

// ============================================================
// Failure policy
// ============================================================

#[tokio::test]
async fn stop_on_error_halts_remaining_actions() {
    let never = Arc::new(MockAdapter::returning(json!("c")));
    let registry = AdapterRegistry::new()
        .with("a", Arc::new(MockAdapter::failing("a broke")))
        .with("b", Arc::new(MockAdapter::failing("b broke")))
        .with("c", never.clone());
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(
        &store,
        vec![
            Action::new("a", json!({})),
            Action::new("b", json!({})).stop_on_error(),
            Action::new("c", json!({})),
        ],
    )
    .await;

    let outcome = executor(registry, store).run(&payload(&workflow), 1).await.unwrap();

    assert_eq!(outcome.status(), ExecutionStatus::Failed);
    assert_eq!(
        outcome_summary(outcome.results()),
        vec![("a".into(), false), ("b".into(), false)]
    );
    assert_eq!(outcome.results()[1].error.as_deref(), Some("b broke"));
    assert_eq!(never.call_count(), 0);

    match outcome {
        ExecutionOutcome::Aborted { error, .. } => assert!(error.contains("b broke")),
        other => panic!("expected abort, got {other:?}"),
    }
}

#[tokio::test]
async fn soft_failure_still_completes() {
    let registry = AdapterRegistry::new()
        .with("a", Arc::new(MockAdapter::failing("nope")))
        .with("b", Arc::new(MockAdapter::returning(json!({ "ok": true }))));
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(
        &store,
        vec![Action::new("a", json!({})), Action::new("b", json!({}))],
    )
    .await;

    let outcome = executor(registry, store).run(&payload(&workflow), 1).await.unwrap();

    assert_eq!(outcome.status(), ExecutionStatus::Completed);
    assert_eq!(
        outcome_summary(outcome.results()),
        vec![("a".into(), false), ("b".into(), true)]
    );
}

#[tokio::test]
async fn unknown_action_type_is_an_action_failure() {
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(&store, vec![Action::new("send_fax", json!({}))]).await;

    let outcome = executor(AdapterRegistry::new(), store)
        .run(&payload(&workflow), 1)
        .await
        .unwrap();

    assert_eq!(outcome.status(), ExecutionStatus::Completed);
    assert_eq!(
        outcome.results()[0].error.as_deref(),
        Some("Unknown action type: send_fax")
    );
}

#[tokio::test(start_paused = true)]
async fn stuck_adapter_times_out() {
    let registry = AdapterRegistry::new()
        .with("stuck", Arc::new(MockAdapter::delayed(Duration::from_secs(3600), json!(null))));
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(&store, vec![Action::new("stuck", json!({})).stop_on_error()]).await;

    let config = ExecutorConfig { action_timeout: Duration::from_secs(1) };
    let outcome = StepExecutor::new(Arc::new(registry), store, config)
        .run(&payload(&workflow), 1)
        .await
        .unwrap();

    assert_eq!(outcome.status(), ExecutionStatus::Failed);
    assert!(outcome.results()[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
}

// ============================================================
// Variables
// ============================================================

#[tokio::test]
async fn output_variables_feed_later_params() {
    let b = Arc::new(MockAdapter::echo());
    let registry = AdapterRegistry::new()
        .with("a", Arc::new(MockAdapter::returning(json!(5))))
        .with("b", b.clone());
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(
        &store,
        vec![
            Action::new("a", json!({})).output_to("x"),
            Action::new("b", json!({ "msg": "{{x}}" })),
        ],
    )
    .await;

    executor(registry, store).run(&payload(&workflow), 1).await.unwrap();

    assert_eq!(b.params_seen(), vec![json!({ "msg": "5" })]);
}

#[tokio::test]
async fn failed_action_binds_nothing_and_last_write_wins() {
    let c = Arc::new(MockAdapter::echo());
    let registry = AdapterRegistry::new()
        .with("one", Arc::new(MockAdapter::returning(json!("first"))))
        .with("two", Arc::new(MockAdapter::returning(json!("second"))))
        .with("bad", Arc::new(MockAdapter::failing("x")))
        .with("c", c.clone());
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(
        &store,
        vec![
            Action::new("one", json!({})).output_to("v"),
            Action::new("two", json!({})).output_to("v"),
            Action::new("bad", json!({})).output_to("missing"),
            Action::new("c", json!({ "v": "{{v}}", "m": "{{missing}}" })),
        ],
    )
    .await;

    executor(registry, store).run(&payload(&workflow), 1).await.unwrap();

    assert_eq!(c.params_seen(), vec![json!({ "v": "second", "m": "{{missing}}" })]);
}

#[tokio::test]
async fn adapters_see_step_context() {
    let mock = Arc::new(MockAdapter::returning(json!(null)));
    let registry = AdapterRegistry::new().with("m", mock.clone());
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(
        &store,
        vec![Action::new("m", json!({})), Action::new("m", json!({}))],
    )
    .await;
    let payload = payload(&workflow);

    executor(registry, store).run(&payload, 2).await.unwrap();

    let calls = mock.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].ctx.step, 1);
    assert_eq!(calls[1].ctx.attempt, 2);
    assert_eq!(calls[1].ctx.user_id, workflow.user_id);
    assert_eq!(
        calls[1].ctx.idempotency_key(),
        format!("{}:1", payload.execution_id)
    );
}

// ============================================================
// lastRun and validation
// ============================================================

#[tokio::test]
async fn last_run_is_stamped_even_on_abort() {
    let registry = AdapterRegistry::new().with("a", Arc::new(MockAdapter::failing("x")));
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(&store, vec![Action::new("a", json!({})).stop_on_error()]).await;

    executor(registry, store.clone()).run(&payload(&workflow), 1).await.unwrap();

    assert!(store.get_workflow(workflow.id).await.unwrap().last_run.is_some());
}

#[tokio::test]
async fn deleted_workflow_does_not_fail_the_run() {
    let registry = AdapterRegistry::new().with("a", Arc::new(MockAdapter::returning(json!(1))));
    let store = Arc::new(InMemoryStore::new());
    let workflow = Workflow::new("gone", Uuid::new_v4(), Trigger::Manual, vec![Action::new("a", json!({}))]);

    let outcome = executor(registry, store).run(&payload(&workflow), 1).await.unwrap();
    assert_eq!(outcome.status(), ExecutionStatus::Completed);
}

#[tokio::test]
async fn malformed_action_list_runs_nothing() {
    let mock = Arc::new(MockAdapter::returning(json!(1)));
    let registry = AdapterRegistry::new().with("a", mock.clone());
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(
        &store,
        vec![
            Action::new("a", json!({})),
            Action::new("a", json!({})).output_to("has space"),
        ],
    )
    .await;

    let out = executor(registry, store).run(&payload(&workflow), 1).await;

    assert!(matches!(out, Err(EngineError::InvalidAction { step: 1, .. })));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn empty_action_list_completes_with_empty_trail() {
    let store = Arc::new(InMemoryStore::new());
    let workflow = stored_workflow(&store, vec![]).await;

    let outcome = executor(AdapterRegistry::new(), store)
        .run(&payload(&workflow), 1)
        .await
        .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Completed { results: vec![] });
}
