//! The `IntegrationAdapter` trait, the contract every integration must fulfil.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::AdapterError;

/// Identifies the action being run. Passed to every adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionContext {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    /// Owner of the workflow; selects which connected account to use.
    pub user_id: Uuid,
    /// 0-based position of the action in the workflow.
    pub step: usize,
    /// 1-based job attempt. Greater than 1 means this step may already have
    /// run once before.
    pub attempt: u32,
}

impl ActionContext {
    /// Stable across retries of the same execution; adapters talking to
    /// APIs with idempotency support should forward it.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.execution_id, self.step)
    }
}

/// One capability against one connected tool.
#[async_trait]
pub trait IntegrationAdapter: Send + Sync {
    /// Perform `action_type` with already-resolved `params`.
    async fn execute(
        &self,
        action_type: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, AdapterError>;

    /// Deadline for one call with these params. Adapters that knowingly
    /// take long (e.g. `wait`) extend the engine default.
    fn timeout(&self, _params: &Value, default: Duration) -> Duration {
        default
    }
}
