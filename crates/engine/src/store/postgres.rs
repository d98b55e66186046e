use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::WorkflowRow;
use db::{repository, DbError, DbPool};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use super::{ExecutionStore, WorkflowStore};
use crate::models::{Execution, ExecutionStatus, Workflow};
use crate::EngineError;

/// Store backed by the `workflows` and `workflow_executions` tables.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn create_execution(&self, workflow_id: Uuid) -> Result<Execution, EngineError> {
        let row = repository::executions::create_execution(&self.pool, workflow_id).await?;
        Execution::try_from(row)
    }

    async fn update_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        match repository::executions::update_execution(
            &self.pool,
            id,
            status.as_str(),
            result,
            error.as_deref(),
        )
        .await
        {
            Ok(()) => Ok(()),
            // Zero rows: either missing or already terminal.
            Err(DbError::NotFound) => match repository::executions::get_execution(&self.pool, id).await {
                Ok(_) => Err(EngineError::ExecutionFinalized(id)),
                Err(DbError::NotFound) => Err(EngineError::ExecutionNotFound(id)),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn get_execution(&self, id: Uuid) -> Result<Execution, EngineError> {
        match repository::executions::get_execution(&self.pool, id).await {
            Ok(row) => Execution::try_from(row),
            Err(DbError::NotFound) => Err(EngineError::ExecutionNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, EngineError> {
        match repository::workflows::get_workflow(&self.pool, id).await {
            Ok(row) => Workflow::try_from(row),
            Err(DbError::NotFound) => Err(EngineError::WorkflowNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_active(&self) -> Result<Vec<Workflow>, EngineError> {
        let rows = repository::workflows::list_active_workflows(&self.pool).await?;
        Ok(decode_workflows(rows))
    }

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), EngineError> {
        match repository::workflows::touch_last_run(&self.pool, id, at).await {
            Ok(()) => Ok(()),
            Err(DbError::NotFound) => Err(EngineError::WorkflowNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Decode stored rows, logging and skipping any whose JSON no longer
/// parses so one bad definition cannot keep the rest from loading.
fn decode_workflows(rows: Vec<WorkflowRow>) -> Vec<Workflow> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            Workflow::try_from(row)
                .map_err(|e| error!(workflow_id = %id, "skipping stored workflow: {e}"))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(trigger: Value) -> WorkflowRow {
        WorkflowRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "stored".into(),
            description: None,
            is_active: true,
            trigger,
            actions: json!([{ "type": "log", "params": { "message": "hi" } }]),
            last_run: None,
        }
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let good = row(json!({ "type": "schedule", "cron": "0 9 * * *" }));
        let missing_cron = row(json!({ "type": "schedule" }));
        let mut bad_actions = row(json!({ "type": "manual" }));
        bad_actions.actions = json!({ "not": "a list" });

        let decoded = decode_workflows(vec![missing_cron, good.clone(), bad_actions]);

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, good.id);
    }
}
