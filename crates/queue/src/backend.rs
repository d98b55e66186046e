//! Storage seam for the queue.
//!
//! A backend owns job state; workers only ever talk to it through
//! [`QueueBackend`]. `claim` must hand a given job to at most one caller at a
//! time. The Postgres backend relies on `FOR UPDATE SKIP LOCKED` and the
//! in-memory one on a mutex.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{Job, JobStatus, QueueError};

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a new pending job.
    async fn push(&self, job: Job) -> Result<(), QueueError>;

    /// Atomically take the oldest pending job whose `run_at` is due, mark it
    /// as processing and bump its attempt counter.
    ///
    /// Returns `None` if nothing is due.
    async fn claim(&self, now: DateTime<Utc>) -> Result<Option<Job>, QueueError>;

    /// Mark a claimed job as completed.
    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Put a claimed job back to pending, claimable again from `run_at`.
    async fn retry_at(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<(), QueueError>;

    /// Park a job permanently after its final failure.
    async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError>;

    /// Called periodically while a claimed job runs. Backends that reclaim
    /// jobs after a lease extend it here.
    async fn heartbeat(&self, _job_id: Uuid) -> Result<(), QueueError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Finished jobs remembered for status lookups, oldest evicted first.
pub const FINISHED_RETENTION: usize = 1024;

#[derive(Debug)]
struct Entry {
    job: Job,
    status: JobStatus,
    /// Insertion order, used as a FIFO tie-breaker.
    seq: u64,
}

/// What is left of a job once it completed or was dead-lettered. The
/// payload is dropped.
#[derive(Debug)]
struct Finished {
    id: Uuid,
    status: JobStatus,
    error: Option<String>,
}

#[derive(Debug)]
struct State {
    entries: HashMap<Uuid, Entry>,
    finished: VecDeque<Finished>,
    retention: usize,
    next_seq: u64,
}

impl State {
    fn finish(&mut self, job_id: Uuid, status: JobStatus, error: Option<String>) -> Result<(), QueueError> {
        self.entries.remove(&job_id).ok_or(QueueError::NotFound(job_id))?;
        if self.retention == 0 {
            return Ok(());
        }
        while self.finished.len() >= self.retention {
            self.finished.pop_front();
        }
        self.finished.push_back(Finished { id: job_id, status, error });
        Ok(())
    }

    fn finished(&self, job_id: Uuid) -> Option<&Finished> {
        self.finished.iter().rev().find(|f| f.id == job_id)
    }
}

/// Process-local backend. Not durable across restarts.
///
/// Only pending and processing jobs are held in full. Completed and
/// dead-lettered jobs shrink to a status record, and only the most recent
/// `retention` of those are kept.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_retention(FINISHED_RETENTION)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                finished: VecDeque::new(),
                retention,
                next_seq: 0,
            }),
        }
    }

    pub async fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        let state = self.state.lock().await;
        match state.entries.get(&job_id) {
            Some(entry) => Some(entry.status),
            None => state.finished(job_id).map(|f| f.status),
        }
    }

    pub async fn last_error(&self, job_id: Uuid) -> Option<String> {
        self.state
            .lock()
            .await
            .finished(job_id)
            .and_then(|f| f.error.clone())
    }

    /// Snapshot of every unfinished job, in insertion order.
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        let mut entries: Vec<&Entry> = state.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Number of jobs still waiting to be claimed.
    pub async fn pending_len(&self) -> usize {
        self.state
            .lock()
            .await
            .entries
            .values()
            .filter(|e| e.status == JobStatus::Pending)
            .count()
    }

    /// Jobs held in full: pending or processing.
    pub async fn live_len(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(&job.id) {
            return Err(QueueError::Duplicate(job.id));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            job.id,
            Entry { job, status: JobStatus::Pending, seq },
        );
        Ok(())
    }

    async fn claim(&self, now: DateTime<Utc>) -> Result<Option<Job>, QueueError> {
        let mut state = self.state.lock().await;

        let next = state
            .entries
            .values_mut()
            .filter(|e| e.status == JobStatus::Pending && e.job.run_at <= now)
            .min_by_key(|e| (e.job.run_at, e.seq));

        Ok(next.map(|entry| {
            entry.status = JobStatus::Processing;
            entry.job.attempts += 1;
            entry.job.clone()
        }))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .finish(job_id, JobStatus::Completed, None)
    }

    async fn retry_at(&self, job_id: Uuid, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let entry = state.entries.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        entry.status = JobStatus::Pending;
        entry.job.run_at = run_at;
        Ok(())
    }

    async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .finish(job_id, JobStatus::DeadLettered, Some(error.to_owned()))
    }
}
