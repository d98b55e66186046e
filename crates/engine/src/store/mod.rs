//! Persistence seams used by the engine.
//!
//! The engine talks to storage only through these traits, so the same
//! executor and trigger manager run against Postgres in production and the
//! in-memory store in tests and single-process mode.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Execution, ExecutionStatus, Workflow};
use crate::EngineError;

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new `pending` execution for `workflow_id`.
    async fn create_execution(&self, workflow_id: Uuid) -> Result<Execution, EngineError>;

    /// Move an execution to `status`. `result`/`error` left as `None` keep
    /// what is stored. Terminal statuses stamp `completed_at`.
    ///
    /// # Errors
    /// [`EngineError::ExecutionFinalized`] when the execution is already
    /// `completed` or `failed`; [`EngineError::ExecutionNotFound`] when it
    /// does not exist.
    async fn update_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), EngineError>;

    async fn get_execution(&self, id: Uuid) -> Result<Execution, EngineError>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: Uuid) -> Result<Workflow, EngineError>;

    /// Every active workflow; used to restore schedules on start-up.
    async fn list_active(&self) -> Result<Vec<Workflow>, EngineError>;

    async fn touch_last_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), EngineError>;
}
