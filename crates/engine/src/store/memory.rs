use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExecutionStore, WorkflowStore};
use crate::models::{Execution, ExecutionStatus, Workflow};
use crate::EngineError;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a workflow definition.
    pub async fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }

    pub async fn remove_workflow(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.write().await.remove(&id)
    }

    /// Executions of one workflow, oldest first.
    pub async fn executions_for(&self, workflow_id: Uuid) -> Vec<Execution> {
        let mut out: Vec<Execution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.started_at);
        out
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(&self, workflow_id: Uuid) -> Result<Execution, EngineError> {
        let execution = Execution::pending(workflow_id);
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(execution)
    }

    async fn update_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(&id)
            .ok_or(EngineError::ExecutionNotFound(id))?;

        if execution.status.is_terminal() {
            return Err(EngineError::ExecutionFinalized(id));
        }

        execution.status = status;
        if result.is_some() {
            execution.result = result;
        }
        if error.is_some() {
            execution.error = error;
        }
        if status.is_terminal() {
            execution.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Execution, EngineError> {
        self.executions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::ExecutionNotFound(id))
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    async fn list_active(&self) -> Result<Vec<Workflow>, EngineError> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.is_active)
            .cloned()
            .collect())
    }

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), EngineError> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&id)
            .ok_or(EngineError::WorkflowNotFound(id))?;
        workflow.last_run = Some(at);
        Ok(())
    }
}
