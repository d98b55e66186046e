//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow and its runs look
//! like in memory. Field names serialize in camelCase, matching the JSON the
//! definition builder stores in the `trigger` / `actions` columns.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::EngineError;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Started on demand.
    Manual,
    /// Started on every tick of a standard five-field cron expression.
    Schedule { cron: String },
    /// Started by an external event whose fields match `conditions`.
    Webhook {
        #[serde(default)]
        conditions: Map<String, Value>,
    },
    /// Any `type` this build does not know. Never scheduled.
    #[serde(other)]
    Unsupported,
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule { .. } => "schedule",
            Self::Webhook { .. } => "webhook",
            Self::Unsupported => "unsupported",
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A single step in the workflow.
///
/// `params` is an arbitrary JSON tree; string leaves may contain
/// `{{variable}}` placeholders resolved just before the action runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Maps to a registered integration adapter.
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Value,
    /// Abort the remaining actions when this one fails.
    #[serde(default)]
    pub stop_on_error: bool,
    /// Bind this action's result under the given name for later actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

impl Action {
    pub fn new(action_type: impl Into<String>, params: Value) -> Self {
        Self {
            action_type: action_type.into(),
            params,
            stop_on_error: false,
            output_variable: None,
        }
    }

    pub fn stop_on_error(mut self) -> Self {
        self.stop_on_error = true;
        self
    }

    pub fn output_to(mut self, variable: impl Into<String>) -> Self {
        self.output_variable = Some(variable.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    /// Owner; the only user whose integrations the actions may touch.
    pub user_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub trigger: Trigger,
    /// Run strictly in this order.
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(
        name: impl Into<String>,
        user_id: Uuid,
        trigger: Trigger,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: None,
            is_active: true,
            trigger,
            actions,
            last_run: None,
        }
    }
}

impl TryFrom<db::models::WorkflowRow> for Workflow {
    type Error = EngineError;

    fn try_from(row: db::models::WorkflowRow) -> Result<Self, Self::Error> {
        let trigger = serde_json::from_value(row.trigger)
            .map_err(|e| EngineError::InvalidDefinition(format!("trigger: {e}")))?;
        let actions = serde_json::from_value(row.actions)
            .map_err(|e| EngineError::InvalidDefinition(format!("actions: {e}")))?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            trigger,
            actions,
            last_run: row.last_run,
        })
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Lifecycle of one run: `pending → running → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// `completed` and `failed` are final; the record is immutable afterwards.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending   => "pending",
            Self::Running   => "running",
            Self::Completed => "completed",
            Self::Failed    => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Serialized `Vec<ActionResult>`.
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Execution {
    pub fn pending(workflow_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// The results trail, if one has been stored.
    pub fn results(&self) -> Option<Vec<ActionResult>> {
        self.result
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl TryFrom<db::models::ExecutionRow> for Execution {
    type Error = EngineError;

    fn try_from(row: db::models::ExecutionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(EngineError::InvalidDefinition)?;

        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            result: row.result,
            error: row.error,
        })
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Audit-trail entry for one attempted action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

/// Variable bindings and results accumulated during one execution.
/// Lives only as long as the run; the results end up in `Execution.result`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub variables: HashMap<String, Value>,
    pub results: Vec<ActionResult>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a success entry and bind the action's output variable.
    pub fn record_success(&mut self, action: &Action, value: Value) {
        if let Some(name) = &action.output_variable {
            self.variables.insert(name.clone(), value.clone());
        }
        self.results.push(ActionResult {
            action_type: action.action_type.clone(),
            result: Some(value),
            error: None,
            success: true,
        });
    }

    pub fn record_failure(&mut self, action: &Action, message: impl Into<String>) {
        self.results.push(ActionResult {
            action_type: action.action_type.clone(),
            result: None,
            error: Some(message.into()),
            success: false,
        });
    }
}

// ---------------------------------------------------------------------------
// Job payload
// ---------------------------------------------------------------------------

/// What a queued job carries. Actions are snapshotted at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub user_id: Uuid,
    pub actions: Vec<Action>,
}

impl JobPayload {
    pub fn for_execution(workflow: &Workflow, execution_id: Uuid) -> Self {
        Self {
            workflow_id: workflow.id,
            execution_id,
            user_id: workflow.user_id,
            actions: workflow.actions.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a step-executor run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every action was attempted. Individual entries may still have failed.
    Completed { results: Vec<ActionResult> },
    /// A stop-on-error action failed; the trail ends with that failure.
    Aborted {
        results: Vec<ActionResult>,
        error: String,
    },
}

impl ExecutionOutcome {
    pub fn results(&self) -> &[ActionResult] {
        match self {
            Self::Completed { results } | Self::Aborted { results, .. } => results,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Completed { .. } => ExecutionStatus::Completed,
            Self::Aborted { .. } => ExecutionStatus::Failed,
        }
    }
}
