//! Engine tuning knobs.

use std::time::Duration;

use queue::{QueueConfig, RetryPolicy};

use crate::executor::ExecutorConfig;

/// Everything the engine lets operators tune. The CLI builds one from flags
/// and environment variables; tests usually start from `Default`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Jobs processed in parallel.
    pub concurrency: usize,
    /// Attempts per job before the execution is marked failed.
    pub max_attempts: u32,
    /// First retry delay; doubles on every further attempt.
    pub backoff_base: Duration,
    /// Default deadline for a single action call.
    pub action_timeout: Duration,
    pub poll_interval: Duration,
    /// How long a Postgres job may go without a heartbeat before another
    /// worker reclaims it.
    pub job_lease: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            action_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            job_lease: db::DEFAULT_LEASE,
        }
    }
}

impl EngineConfig {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency: self.concurrency,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: self.backoff_base,
            },
            poll_interval: self.poll_interval,
            heartbeat_interval: self.job_lease / 4,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            action_timeout: self.action_timeout,
        }
    }
}
