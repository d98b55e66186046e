//! Queue-level error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the queue itself (intake and backend bookkeeping).
#[derive(Debug, Error)]
pub enum QueueError {
    /// A job with this ID is already known to the backend.
    #[error("job {0} is already enqueued")]
    Duplicate(Uuid),

    /// The backend has no record of the job.
    #[error("job {0} not found")]
    NotFound(Uuid),

    /// The storage behind the queue failed (connection, query, ...).
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Outcome of a failed job attempt, as reported by a [`crate::JobHandler`].
///
/// The worker uses the variant to decide what happens next:
/// - `Retryable`: re-queued with exponential back-off until attempts run out.
/// - `Permanent`: the job is dead-lettered immediately.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("retryable job error: {0}")]
    Retryable(String),

    #[error("permanent job error: {0}")]
    Permanent(String),
}

impl JobError {
    /// The message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}
