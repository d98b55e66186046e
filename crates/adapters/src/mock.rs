//! `MockAdapter`, a test double for `IntegrationAdapter`.
//!
//! Useful in unit and integration tests where a real integration is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{ActionContext, AdapterError, IntegrationAdapter};

/// Behaviour injected into `MockAdapter` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with `AdapterError::Failed`.
    Fail(String),
    /// Sleep, then return the value.
    Delay(Duration, Value),
    /// Fail the first `n` calls, then return the value.
    FailTimes(usize, String, Value),
    /// Return the params it was called with.
    Echo,
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub action_type: String,
    pub params: Value,
    pub ctx: ActionContext,
}

/// A mock adapter that records every call it receives and returns a
/// programmer-specified result.
pub struct MockAdapter {
    /// What the adapter will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All calls seen by this adapter (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockAdapter {
    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mock that always succeeds with the given value.
    pub fn returning(value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::ReturnValue(value))
    }

    /// A mock that always fails with the given message.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::Fail(msg.into()))
    }

    /// A mock that sleeps for `delay` before succeeding.
    pub fn delayed(delay: Duration, value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::Delay(delay, value))
    }

    /// A mock that fails `times` times before succeeding.
    pub fn flaky(times: usize, msg: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(MockBehaviour::FailTimes(times, msg.into(), value))
    }

    /// A mock that returns its params.
    pub fn echo() -> Self {
        Self::with_behaviour(MockBehaviour::Echo)
    }

    /// Number of times this adapter has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Params of every call, in order.
    pub fn params_seen(&self) -> Vec<Value> {
        self.calls.lock().unwrap().iter().map(|c| c.params.clone()).collect()
    }
}

#[async_trait]
impl IntegrationAdapter for MockAdapter {
    async fn execute(
        &self,
        action_type: &str,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<Value, AdapterError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(MockCall {
                action_type: action_type.to_owned(),
                params: params.clone(),
                ctx: ctx.clone(),
            });
            calls.len()
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::Fail(msg) => Err(AdapterError::Failed(msg.clone())),
            MockBehaviour::Delay(delay, v) => {
                tokio::time::sleep(*delay).await;
                Ok(v.clone())
            }
            MockBehaviour::FailTimes(times, msg, v) => {
                if call_index <= *times {
                    Err(AdapterError::Failed(msg.clone()))
                } else {
                    Ok(v.clone())
                }
            }
            MockBehaviour::Echo => Ok(params),
        }
    }
}
