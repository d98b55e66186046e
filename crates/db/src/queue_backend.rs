//! Durable [`QueueBackend`] on top of the `job_queue` table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queue::{Job, QueueBackend, QueueError};
use uuid::Uuid;

use crate::repository::jobs;
use crate::{DbError, DbPool};

/// How long a `processing` job may go without a heartbeat before another
/// worker may take it.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(600);

/// Postgres-backed queue storage. Safe to share between processes.
///
/// Workers heartbeat running jobs, which pushes the lease forward. A job
/// whose worker disappears (crash, kill) stops being heartbeated and is
/// claimed again once its lease runs out, costing one attempt.
#[derive(Debug, Clone)]
pub struct PgQueueBackend {
    pool: DbPool,
    lease: Duration,
}

impl PgQueueBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, lease: DEFAULT_LEASE }
    }

    /// Set the lease. It must be several heartbeat intervals long.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

fn backend_error(job_id: Uuid) -> impl Fn(DbError) -> QueueError {
    move |e| match e {
        DbError::NotFound => QueueError::NotFound(job_id),
        other => QueueError::Backend(other.to_string()),
    }
}

#[async_trait]
impl QueueBackend for PgQueueBackend {
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        let max_attempts = i32::try_from(job.max_attempts).unwrap_or(i32::MAX);
        let inserted = jobs::enqueue_job(&self.pool, job.id, job.payload, max_attempts, job.run_at)
            .await
            .map_err(backend_error(job.id))?;

        if !inserted {
            return Err(QueueError::Duplicate(job.id));
        }
        Ok(())
    }

    async fn claim(&self, now: DateTime<Utc>) -> Result<Option<Job>, QueueError> {
        let stale_before = chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let row = jobs::fetch_next_job(&self.pool, now, stale_before)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(row.map(Job::from))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        jobs::complete_job(&self.pool, job_id)
            .await
            .map_err(backend_error(job_id))
    }

    async fn retry_at(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        jobs::reschedule_job(&self.pool, job_id, run_at)
            .await
            .map_err(backend_error(job_id))
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        jobs::dead_letter_job(&self.pool, job_id, error)
            .await
            .map_err(backend_error(job_id))
    }

    async fn heartbeat(&self, job_id: Uuid) -> Result<(), QueueError> {
        jobs::touch_job(&self.pool, job_id)
            .await
            .map_err(backend_error(job_id))
    }
}
