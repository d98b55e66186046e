//! Job records and enqueue options.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a job inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    DeadLettered,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending      => write!(f, "pending"),
            Self::Processing   => write!(f, "processing"),
            Self::Completed    => write!(f, "completed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"       => Ok(Self::Pending),
            "processing"    => Ok(Self::Processing),
            "completed"     => Ok(Self::Completed),
            "dead_lettered" => Ok(Self::DeadLettered),
            other           => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One unit of work. `attempts` counts claims so far, so inside a handler it
/// is the 1-based number of the attempt currently running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: Value,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Earliest instant a worker may claim the job.
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: Uuid, payload: Value, max_attempts: u32, run_at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            run_at,
            created_at: Utc::now(),
        }
    }

    /// True when a failure of the running attempt exhausts the job.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// `now + delay`, clamped to the latest representable instant.
pub fn run_at_after(delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Options accepted by [`crate::ExecutionQueue::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Hold the job back for this long before it becomes claimable.
    pub delay: Option<Duration>,
    /// Override the queue's default attempt budget.
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }
}
