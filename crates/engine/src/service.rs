//! `WorkflowEngine`: the one object a process builds at start-up and hands
//! to whatever needs to run, schedule or inspect workflows.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use adapters::AdapterRegistry;
use db::{DbPool, PgQueueBackend};
use queue::{ExecutionQueue, MemoryBackend, QueueBackend, WorkerPool};

use crate::executor::StepExecutor;
use crate::models::{Execution, Trigger};
use crate::runner::ExecutionRunner;
use crate::store::{ExecutionStore, InMemoryStore, PgStore, WorkflowStore};
use crate::trigger::{conditions_match, TriggerManager};
use crate::{EngineConfig, EngineError};

pub struct WorkflowEngine {
    config: EngineConfig,
    workflows: Arc<dyn WorkflowStore>,
    executions: Arc<dyn ExecutionStore>,
    queue: Arc<ExecutionQueue>,
    executor: Arc<StepExecutor>,
    triggers: TriggerManager,
    workers: Mutex<Option<WorkerPool>>,
}

impl WorkflowEngine {
    pub async fn new(
        config: EngineConfig,
        registry: AdapterRegistry,
        workflows: Arc<dyn WorkflowStore>,
        executions: Arc<dyn ExecutionStore>,
        backend: Arc<dyn QueueBackend>,
    ) -> Result<Self, EngineError> {
        let queue = Arc::new(ExecutionQueue::new(backend, config.queue_config()));
        let executor = Arc::new(StepExecutor::new(
            Arc::new(registry),
            Arc::clone(&workflows),
            config.executor_config(),
        ));
        let triggers = TriggerManager::new(Arc::clone(&queue), Arc::clone(&executions)).await?;

        debug!("engine built with actions {:?}", executor.registry().action_types());

        Ok(Self {
            config,
            workflows,
            executions,
            queue,
            executor,
            triggers,
            workers: Mutex::new(None),
        })
    }

    /// Engine over process-local storage. The returned store is where
    /// workflow definitions go.
    pub async fn in_memory(
        config: EngineConfig,
        registry: AdapterRegistry,
    ) -> Result<(Self, Arc<InMemoryStore>), EngineError> {
        let store = Arc::new(InMemoryStore::new());
        let engine = Self::new(
            config,
            registry,
            store.clone(),
            store.clone(),
            Arc::new(MemoryBackend::new()),
        )
        .await?;
        Ok((engine, store))
    }

    /// Engine over Postgres: definitions, executions and the job queue.
    pub async fn postgres(
        config: EngineConfig,
        registry: AdapterRegistry,
        pool: DbPool,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(PgStore::new(pool.clone()));
        let backend = Arc::new(PgQueueBackend::new(pool).with_lease(config.job_lease));
        Self::new(config, registry, store.clone(), store, backend).await
    }

    /// Start workers and the cron scheduler, and register every active
    /// scheduled workflow.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.start_workers().await;
        self.triggers.start().await?;

        let active = self.workflows.list_active().await?;
        self.triggers.restore(&active).await;
        Ok(())
    }

    /// Start the worker pool only. A no-op when it is already running.
    pub async fn start_workers(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_none() {
            let runner = ExecutionRunner::new(Arc::clone(&self.executor), Arc::clone(&self.executions));
            *workers = Some(self.queue.spawn_workers(Arc::new(runner)));
        }
    }

    /// Stop cron ticks, then let in-flight jobs finish.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let scheduler = self.triggers.shutdown().await;
        if let Some(pool) = self.workers.lock().await.take() {
            pool.shutdown().await;
        }
        info!("engine stopped");
        scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn triggers(&self) -> &TriggerManager {
        &self.triggers
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    pub fn executions(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowStore> {
        &self.workflows
    }

    /// Run a stored workflow now, whatever its trigger.
    ///
    /// # Errors
    /// [`EngineError::WorkflowNotFound`], [`EngineError::WorkflowInactive`],
    /// or anything [`TriggerManager::schedule`] reports.
    pub async fn run_workflow(&self, workflow_id: Uuid) -> Result<Execution, EngineError> {
        let workflow = self.workflows.get_workflow(workflow_id).await?;
        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(workflow_id));
        }
        self.triggers.schedule(&workflow, &Trigger::Manual).await
    }

    /// Feed an external event to a webhook workflow.
    ///
    /// Returns `None` when the event does not match the workflow's
    /// conditions; nothing is enqueued then.
    pub async fn handle_event(
        &self,
        workflow_id: Uuid,
        event: &Value,
    ) -> Result<Option<Execution>, EngineError> {
        let workflow = self.workflows.get_workflow(workflow_id).await?;
        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(workflow_id));
        }

        let Trigger::Webhook { conditions } = &workflow.trigger else {
            return Err(EngineError::TriggerMismatch {
                workflow_id,
                expected: "webhook",
                found: workflow.trigger.kind(),
            });
        };

        if !conditions_match(conditions, event) {
            debug!(workflow_id = %workflow_id, "event does not match webhook conditions");
            return Ok(None);
        }

        self.triggers
            .schedule(&workflow, &workflow.trigger)
            .await
            .map(Some)
    }

    /// Re-read a workflow and reconcile its cron registration. A deleted
    /// workflow loses its registration.
    pub async fn sync_schedule(&self, workflow_id: Uuid) -> Result<Option<Execution>, EngineError> {
        match self.workflows.get_workflow(workflow_id).await {
            Ok(workflow) => self.triggers.sync(&workflow).await,
            Err(EngineError::WorkflowNotFound(_)) => {
                self.triggers.cancel(workflow_id).await?;
                Err(EngineError::WorkflowNotFound(workflow_id))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn cancel_schedule(&self, workflow_id: Uuid) -> Result<bool, EngineError> {
        self.triggers.cancel(workflow_id).await
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        self.executions.get_execution(execution_id).await
    }
}
