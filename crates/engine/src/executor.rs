//! Step executor.
//!
//! `StepExecutor` runs one execution's actions:
//! 1. Validates the action list.
//! 2. Walks the actions strictly in order, resolving each action's params
//!    against the variables bound so far.
//! 3. Dispatches through the `AdapterRegistry` under a per-action deadline.
//! 4. Records every attempt in the results trail; a failure aborts the run
//!    only when the action has `stopOnError` set.
//! 5. Stamps the workflow's `lastRun`, whether the run succeeded or not.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use adapters::{ActionContext, AdapterError, AdapterRegistry};

use crate::models::{Action, ExecutionContext, ExecutionOutcome, JobPayload};
use crate::resolver::{referenced_variables, resolve};
use crate::store::WorkflowStore;
use crate::validate::validate_actions;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Deadline for one adapter call unless the adapter asks for more.
    pub action_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Stateless runner for a single execution's action list.
///
/// One instance is shared by every worker; all per-run state lives in the
/// `ExecutionContext` created inside [`StepExecutor::run`].
pub struct StepExecutor {
    registry: Arc<AdapterRegistry>,
    workflows: Arc<dyn WorkflowStore>,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        workflows: Arc<dyn WorkflowStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self { registry, workflows, config }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Run every action of `payload`. `attempt` is the 1-based job attempt
    /// and is passed through to adapters.
    ///
    /// Action failures never surface as `Err`; they end up in the outcome's
    /// results trail.
    ///
    /// # Errors
    /// [`EngineError::InvalidAction`] for a malformed action list (nothing is
    /// run), or a store error while recording `lastRun`.
    #[instrument(
        skip(self, payload),
        fields(workflow_id = %payload.workflow_id, execution_id = %payload.execution_id)
    )]
    pub async fn run(
        &self,
        payload: &JobPayload,
        attempt: u32,
    ) -> Result<ExecutionOutcome, EngineError> {
        validate_actions(&payload.actions)?;

        let mut context = ExecutionContext::new();
        let mut abort: Option<String> = None;

        for (step, action) in payload.actions.iter().enumerate() {
            let ctx = ActionContext {
                workflow_id: payload.workflow_id,
                execution_id: payload.execution_id,
                user_id: payload.user_id,
                step,
                attempt,
            };

            // Resolved against the bindings as they are right now.
            let params = resolve(&action.params, &context.variables);

            match self.dispatch(action, params, &ctx).await {
                Ok(value) => {
                    debug!("step {} ({}) succeeded", step, action.action_type);
                    context.record_success(action, value);
                }
                Err(err) => {
                    let message = err.to_string();
                    context.record_failure(action, message.clone());

                    if action.stop_on_error {
                        warn!(
                            "step {} ({}) failed, aborting remaining actions: {}",
                            step, action.action_type, message
                        );
                        abort = Some(format!(
                            "Action {} ({}) failed: {}",
                            step, action.action_type, message
                        ));
                        break;
                    }
                    warn!("step {} ({}) failed, continuing: {}", step, action.action_type, message);
                }
            }
        }

        self.touch_last_run(payload.workflow_id).await?;

        let results = context.results;
        Ok(match abort {
            Some(error) => ExecutionOutcome::Aborted { results, error },
            None => {
                info!("all {} actions attempted", results.len());
                ExecutionOutcome::Completed { results }
            }
        })
    }

    async fn dispatch(
        &self,
        action: &Action,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, AdapterError> {
        let adapter = self.registry.get(&action.action_type).ok_or_else(|| {
            AdapterError::Failed(format!("Unknown action type: {}", action.action_type))
        })?;

        let unresolved = referenced_variables(&params);
        if !unresolved.is_empty() {
            debug!("step {} has unresolved placeholders: {:?}", ctx.step, unresolved);
        }

        let deadline = adapter.timeout(&params, self.config.action_timeout);
        debug!("dispatching step {} ({}) with deadline {:?}", ctx.step, action.action_type, deadline);

        tokio::time::timeout(deadline, adapter.execute(&action.action_type, params, ctx))
            .await
            .map_err(|_| AdapterError::Timeout(deadline))?
    }

    async fn touch_last_run(&self, workflow_id: uuid::Uuid) -> Result<(), EngineError> {
        match self.workflows.touch_last_run(workflow_id, Utc::now()).await {
            Ok(()) => Ok(()),
            // The definition may have been deleted while the job was queued.
            Err(EngineError::WorkflowNotFound(id)) => {
                warn!("workflow {} no longer exists; lastRun not recorded", id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
