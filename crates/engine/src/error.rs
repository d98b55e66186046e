//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the workflow engine (validation, scheduling, execution
/// bookkeeping).
///
/// Action failures are *not* errors at this level: they are recorded in the
/// execution's results trail by the step executor.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Definition errors ------

    /// An action in the list is malformed.
    #[error("action {step} is invalid: {reason}")]
    InvalidAction { step: usize, reason: String },

    /// A schedule trigger's cron expression cannot be used.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// The trigger type is not one the engine knows how to schedule.
    #[error("unsupported trigger type")]
    UnsupportedTrigger,

    /// Stored trigger/actions JSON does not deserialize.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    // ------ Lookup / state errors ------

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// The execution already reached `completed` or `failed`.
    #[error("execution {0} is already finalized")]
    ExecutionFinalized(Uuid),

    #[error("workflow {0} is not active")]
    WorkflowInactive(Uuid),

    /// The workflow is not set up for the way it was triggered.
    #[error("workflow {workflow_id} has a {found} trigger, expected {expected}")]
    TriggerMismatch {
        workflow_id: Uuid,
        expected: &'static str,
        found: &'static str,
    },

    // ------ Infrastructure errors ------

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// True when retrying the same job cannot succeed.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Queue(_) | Self::Scheduler(_) | Self::Database(_))
    }
}
