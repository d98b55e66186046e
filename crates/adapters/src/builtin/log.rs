//! `log`: write a message into the process log.
//!
//! Params are free-form, e.g. `{"message": "order {{orderId}} shipped"}`.
//! They are logged at `info` with the workflow and execution ids and come
//! back unchanged as the step's output.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::{ActionContext, AdapterError, IntegrationAdapter};

/// Writes its params to the log and returns them unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAdapter;

#[async_trait]
impl IntegrationAdapter for LogAdapter {
    async fn execute(
        &self,
        _action_type: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, AdapterError> {
        info!(
            workflow_id = %ctx.workflow_id,
            execution_id = %ctx.execution_id,
            step = ctx.step,
            "log action: {params}"
        );
        Ok(params)
    }
}
