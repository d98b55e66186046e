//! Job runner: the bridge between the execution queue and the step
//! executor.
//!
//! Per attempt:
//! - `pending`/`running` → `running`, then run the actions.
//! - every action attempted → `completed` with the results trail.
//! - stop-on-error abort → trail stored, status stays `running`, and the
//!   job is handed back to the queue as retryable.
//!
//! When the queue gives up on a job, [`ExecutionRunner::on_failed`]
//! finalizes the execution as `failed` with the last error. The job id is
//! the execution id, so this works even for undecodable payloads.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use queue::{Job, JobError, JobHandler};

use crate::executor::StepExecutor;
use crate::models::{ExecutionOutcome, ExecutionStatus, JobPayload};
use crate::store::ExecutionStore;
use crate::EngineError;

pub struct ExecutionRunner {
    executor: Arc<StepExecutor>,
    executions: Arc<dyn ExecutionStore>,
}

impl ExecutionRunner {
    pub fn new(executor: Arc<StepExecutor>, executions: Arc<dyn ExecutionStore>) -> Self {
        Self { executor, executions }
    }

    #[instrument(
        skip(self, payload),
        fields(workflow_id = %payload.workflow_id, execution_id = %payload.execution_id)
    )]
    async fn run(&self, payload: &JobPayload, attempt: u32) -> Result<(), JobError> {
        let execution_id = payload.execution_id;

        match self
            .executions
            .update_execution(execution_id, ExecutionStatus::Running, None, None)
            .await
        {
            Ok(()) => info!("execution running (attempt {})", attempt),
            Err(EngineError::ExecutionFinalized(_)) => {
                warn!("execution already finalized; skipping job");
                return Ok(());
            }
            Err(e) => return Err(job_error(e)),
        }

        let outcome = self.executor.run(payload, attempt).await.map_err(job_error)?;
        let trail = serde_json::to_value(outcome.results())
            .map_err(|e| JobError::Permanent(format!("failed to serialize results: {e}")))?;

        match outcome {
            ExecutionOutcome::Completed { results } => {
                self.executions
                    .update_execution(execution_id, ExecutionStatus::Completed, Some(trail), None)
                    .await
                    .map_err(job_error)?;
                let failed = results.iter().filter(|r| !r.success).count();
                info!(
                    "execution completed: {} actions, {} failed",
                    results.len(),
                    failed
                );
                Ok(())
            }
            ExecutionOutcome::Aborted { error, .. } => {
                // Keep the partial trail visible while the job waits for its
                // next attempt.
                self.executions
                    .update_execution(execution_id, ExecutionStatus::Running, Some(trail), None)
                    .await
                    .map_err(job_error)?;
                Err(JobError::Retryable(error))
            }
        }
    }
}

#[async_trait]
impl JobHandler for ExecutionRunner {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: JobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::Permanent(format!("undecodable job payload: {e}")))?;

        if payload.execution_id != job.id {
            warn!(
                "job {} carries execution {}; using the payload's id",
                job.id, payload.execution_id
            );
        }

        self.run(&payload, job.attempts).await
    }

    async fn on_failed(&self, job: &Job, err: &JobError) {
        let execution_id = serde_json::from_value::<JobPayload>(job.payload.clone())
            .map(|p| p.execution_id)
            .unwrap_or(job.id);

        match self
            .executions
            .update_execution(
                execution_id,
                ExecutionStatus::Failed,
                None,
                Some(err.message().to_owned()),
            )
            .await
        {
            Ok(()) => error!(
                execution_id = %execution_id,
                "execution failed after {} attempt(s): {}",
                job.attempts,
                err.message()
            ),
            Err(EngineError::ExecutionFinalized(_)) => {}
            Err(e) => error!(
                execution_id = %execution_id,
                "could not mark execution failed: {e}"
            ),
        }
    }
}

fn job_error(err: EngineError) -> JobError {
    if err.is_permanent() {
        JobError::Permanent(err.to_string())
    } else {
        JobError::Retryable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use crate::models::{Action, Trigger, Workflow};
    use crate::store::InMemoryStore;
    use adapters::mock::MockAdapter;
    use adapters::AdapterRegistry;
    use chrono::Utc;
    use serde_json::json;

    async fn setup(registry: AdapterRegistry, actions: Vec<Action>) -> (ExecutionRunner, Arc<InMemoryStore>, Job) {
        let store = Arc::new(InMemoryStore::new());
        let workflow = Workflow::new("wf", uuid::Uuid::new_v4(), Trigger::Manual, actions);
        store.insert_workflow(workflow.clone()).await;
        let execution = store.create_execution(workflow.id).await.unwrap();

        let executor = StepExecutor::new(Arc::new(registry), store.clone(), ExecutorConfig::default());
        let runner = ExecutionRunner::new(Arc::new(executor), store.clone());

        let payload = serde_json::to_value(JobPayload::for_execution(&workflow, execution.id)).unwrap();
        let mut job = Job::new(execution.id, payload, 3, Utc::now());
        job.attempts = 1;
        (runner, store, job)
    }

    #[tokio::test]
    async fn completed_run_stores_trail() {
        let registry = AdapterRegistry::new().with("a", Arc::new(MockAdapter::returning(json!(1))));
        let (runner, store, job) = setup(registry, vec![Action::new("a", json!({}))]).await;

        runner.handle(&job).await.unwrap();

        let execution = store.get_execution(job.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(
            execution.result,
            Some(json!([{ "actionType": "a", "result": 1, "success": true }]))
        );
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn abort_is_retryable_and_keeps_partial_trail() {
        let registry = AdapterRegistry::new().with("a", Arc::new(MockAdapter::failing("down")));
        let (runner, store, job) = setup(registry, vec![Action::new("a", json!({})).stop_on_error()]).await;

        let err = runner.handle(&job).await.unwrap_err();
        assert!(matches!(err, JobError::Retryable(ref m) if m.contains("down")));

        let execution = store.get_execution(job.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(execution.results().unwrap().len(), 1);

        runner.on_failed(&job, &err).await;
        let execution = store.get_execution(job.id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error.as_deref().unwrap().contains("down"));
        assert_eq!(execution.results().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_payload_is_permanent_and_still_finalized() {
        let (runner, store, mut job) = setup(AdapterRegistry::new(), vec![]).await;
        job.payload = json!({ "nonsense": true });

        let err = runner.handle(&job).await.unwrap_err();
        assert!(matches!(err, JobError::Permanent(_)));

        runner.on_failed(&job, &err).await;
        assert_eq!(store.get_execution(job.id).await.unwrap().status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn finalized_execution_is_skipped() {
        let mock = Arc::new(MockAdapter::returning(json!(1)));
        let registry = AdapterRegistry::new().with("a", mock.clone());
        let (runner, store, job) = setup(registry, vec![Action::new("a", json!({}))]).await;
        store
            .update_execution(job.id, ExecutionStatus::Failed, None, Some("cancelled".into()))
            .await
            .unwrap();

        runner.handle(&job).await.unwrap();
        assert_eq!(mock.call_count(), 0);

        // A late failure report does not overwrite the terminal record.
        runner.on_failed(&job, &JobError::Permanent("late".into())).await;
        assert_eq!(store.get_execution(job.id).await.unwrap().error.as_deref(), Some("cancelled"));
    }
}
