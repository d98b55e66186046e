//! `wait`: suspend the current execution for a while.
//!
//! Params: `{"ms": 1500}` or `{"seconds": 2}`; numeric strings are accepted.
//! Only the owning job is suspended; the worker's tokio task yields.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::as_u64;
use crate::{ActionContext, AdapterError, IntegrationAdapter};

#[derive(Debug, Clone, Copy, Default)]
pub struct WaitAdapter;

impl WaitAdapter {
    fn duration(params: &Value) -> Result<Duration, AdapterError> {
        if let Some(ms) = params.get("ms") {
            return as_u64(ms)
                .map(Duration::from_millis)
                .ok_or_else(|| AdapterError::InvalidParams(format!("'ms' must be a non-negative integer, got {ms}")));
        }
        if let Some(secs) = params.get("seconds") {
            return as_u64(secs)
                .map(Duration::from_secs)
                .ok_or_else(|| AdapterError::InvalidParams(format!("'seconds' must be a non-negative integer, got {secs}")));
        }
        Err(AdapterError::InvalidParams("wait needs 'ms' or 'seconds'".into()))
    }
}

#[async_trait]
impl IntegrationAdapter for WaitAdapter {
    async fn execute(
        &self,
        _action_type: &str,
        params: Value,
        _ctx: &ActionContext,
    ) -> Result<Value, AdapterError> {
        let duration = Self::duration(&params)?;
        tokio::time::sleep(duration).await;
        Ok(json!({ "waitedMs": u64::try_from(duration.as_millis()).unwrap_or(u64::MAX) }))
    }

    fn timeout(&self, params: &Value, default: Duration) -> Duration {
        Self::duration(params)
            .map(|d| d.saturating_add(default))
            .unwrap_or(default)
    }
}
