//! The execution queue and its worker pool.
//!
//! `ExecutionQueue` is the intake side: it turns payloads into [`Job`]s and
//! wakes idle workers. [`ExecutionQueue::spawn_workers`] starts a fixed number
//! of worker tasks; each one claims a single job at a time, hands it to the
//! [`JobHandler`], and settles the result:
//!
//! - `Ok(())`                                  → job completed.
//! - `Err(JobError::Retryable)` with attempts left → re-queued after back-off.
//! - anything else                              → `on_failed`, then dead-lettered.
//!
//! While a job runs the worker heartbeats it through the backend so a
//! lease-based backend does not hand it to another worker. A job that comes
//! back already past its last attempt (its worker died mid-run) is not run
//! again; it goes straight to `on_failed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::job::run_at_after;
use crate::{EnqueueOptions, Job, JobError, QueueBackend, QueueError, RetryPolicy};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker tasks, i.e. jobs processed in parallel.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// How long an idle worker sleeps before polling the backend again.
    pub poll_interval: Duration,
    /// How often a running job is heartbeated. Keep it well under the
    /// backend's lease.
    pub heartbeat_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler seam
// ---------------------------------------------------------------------------

/// Whatever actually runs a job. Implemented by the engine's job runner.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run one attempt of the job.
    async fn handle(&self, job: &Job) -> Result<(), JobError>;

    /// Called exactly once when the job will not be attempted again.
    async fn on_failed(&self, job: &Job, error: &JobError);
}

// ---------------------------------------------------------------------------
// ExecutionQueue
// ---------------------------------------------------------------------------

pub struct ExecutionQueue {
    backend: Arc<dyn QueueBackend>,
    config: QueueConfig,
    notify: Arc<Notify>,
}

impl ExecutionQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, config: QueueConfig) -> Self {
        Self {
            backend,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Add a job under `job_id`.
    ///
    /// # Errors
    /// [`QueueError::Duplicate`] if `job_id` is already known, or any backend
    /// failure.
    pub async fn enqueue(
        &self,
        job_id: Uuid,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Job, QueueError> {
        let delay = options.delay.unwrap_or_default();
        let run_at = run_at_after(delay);
        let max_attempts = options.max_attempts.unwrap_or(self.config.retry.max_attempts);

        let job = Job::new(job_id, payload, max_attempts, run_at);
        self.backend.push(job.clone()).await?;

        if delay.is_zero() {
            self.notify.notify_one();
        }
        Ok(job)
    }

    /// Start `config.concurrency` workers feeding `handler`.
    pub fn spawn_workers(&self, handler: Arc<dyn JobHandler>) -> WorkerPool {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.config.concurrency.max(1);

        let handles = (0..concurrency)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    backend: Arc::clone(&self.backend),
                    handler: Arc::clone(&handler),
                    retry: self.config.retry,
                    poll_interval: self.config.poll_interval,
                    heartbeat_interval: self.config.heartbeat_interval.max(Duration::from_millis(1)),
                    notify: Arc::clone(&self.notify),
                };
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();

        info!("started worker pool with {} workers", concurrency);
        WorkerPool { shutdown: shutdown_tx, handles }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// Handle to running workers. Dropping it without [`WorkerPool::shutdown`]
/// also stops the workers, but does not wait for in-flight jobs.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Stop claiming new jobs and wait for in-flight ones to settle.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("worker task ended abnormally: {e}");
            }
        }
        info!("worker pool stopped");
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    id: usize,
    backend: Arc<dyn QueueBackend>,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    notify: Arc<Notify>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            match self.backend.claim(Utc::now()).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(worker = self.id, "failed to claim job: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    #[instrument(skip_all, fields(worker = self.id, job_id = %job.id, attempt = job.attempts))]
    async fn process(&self, job: Job) {
        if job.attempts > job.max_attempts {
            let err = JobError::Permanent(format!(
                "worker lost during final attempt {}/{}",
                job.max_attempts, job.max_attempts
            ));
            error!("reclaimed job has no attempts left: {}", err);
            self.handler.on_failed(&job, &err).await;
            if let Err(e) = self.backend.dead_letter(job.id, err.message()).await {
                error!("failed to settle job {}: {e}", job.id);
            }
            return;
        }

        let outcome = self.run_with_heartbeat(&job).await;

        let settled = match outcome {
            Ok(()) => self.backend.complete(job.id).await,

            Err(JobError::Retryable(msg)) if !job.is_final_attempt() => {
                let delay = self.retry.backoff(job.attempts);
                warn!(
                    "job failed (attempt {}/{}), retrying in {:?}: {}",
                    job.attempts, job.max_attempts, delay, msg
                );
                self.backend.retry_at(job.id, run_at_after(delay)).await
            }

            Err(err) => {
                error!(
                    "job failed permanently after {} attempt(s): {}",
                    job.attempts, err
                );
                self.handler.on_failed(&job, &err).await;
                self.backend.dead_letter(job.id, err.message()).await
            }
        };

        if let Err(e) = settled {
            error!("failed to settle job {}: {e}", job.id);
        }
    }

    /// Run the handler on its own task so a panicking adapter costs one
    /// attempt instead of the worker.
    async fn run_with_heartbeat(&self, job: &Job) -> Result<(), JobError> {
        let handler = Arc::clone(&self.handler);
        let attempt_job = job.clone();
        let mut task = tokio::spawn(async move { handler.handle(&attempt_job).await });

        let start = tokio::time::Instant::now() + self.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(start, self.heartbeat_interval);

        loop {
            tokio::select! {
                joined = &mut task => {
                    return joined.unwrap_or_else(|e| {
                        Err(JobError::Retryable(format!("job handler panicked: {e}")))
                    });
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.backend.heartbeat(job.id).await {
                        warn!("failed to heartbeat job {}: {e}", job.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobStatus, MemoryBackend};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fast_config(concurrency: usize) -> QueueConfig {
        QueueConfig {
            concurrency,
            retry: RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(10) },
            poll_interval: Duration::from_millis(5),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    /// Fails the first `failures` attempts of every job with `error`.
    struct ScriptedHandler {
        failures: u32,
        error: JobError,
        attempts: Mutex<Vec<u32>>,
        failed: Mutex<Vec<(Uuid, JobError)>>,
    }

    impl ScriptedHandler {
        fn new(failures: u32, error: JobError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                attempts: Mutex::new(Vec::new()),
                failed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn handle(&self, job: &Job) -> Result<(), JobError> {
            self.attempts.lock().unwrap().push(job.attempts);
            if job.attempts <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }

        async fn on_failed(&self, job: &Job, error: &JobError) {
            self.failed.lock().unwrap().push((job.id, error.clone()));
        }
    }

    async fn wait_for_status(backend: &MemoryBackend, id: Uuid, status: JobStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.status(id).await != Some(status) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not reach the expected status in time");
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = ExecutionQueue::new(backend.clone(), fast_config(1));
        let handler = ScriptedHandler::new(2, JobError::Retryable("flaky".into()));
        let pool = queue.spawn_workers(handler.clone());

        let id = Uuid::new_v4();
        queue.enqueue(id, json!({}), EnqueueOptions::immediate()).await.unwrap();
        wait_for_status(&backend, id, JobStatus::Completed).await;
        pool.shutdown().await;

        assert_eq!(*handler.attempts.lock().unwrap(), vec![1, 2, 3]);
        assert!(handler.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_job_is_dead_lettered_once() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = ExecutionQueue::new(backend.clone(), fast_config(2));
        let handler = ScriptedHandler::new(u32::MAX, JobError::Retryable("down".into()));
        let pool = queue.spawn_workers(handler.clone());

        let id = Uuid::new_v4();
        queue.enqueue(id, json!({}), EnqueueOptions::immediate()).await.unwrap();
        wait_for_status(&backend, id, JobStatus::DeadLettered).await;
        pool.shutdown().await;

        assert_eq!(*handler.attempts.lock().unwrap(), vec![1, 2, 3]);
        let failed = handler.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, id);
        assert_eq!(backend.last_error(id).await.as_deref(), Some("down"));
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = ExecutionQueue::new(backend.clone(), fast_config(1));
        let handler = ScriptedHandler::new(u32::MAX, JobError::Permanent("bad payload".into()));
        let pool = queue.spawn_workers(handler.clone());

        let id = Uuid::new_v4();
        queue.enqueue(id, json!({}), EnqueueOptions::immediate()).await.unwrap();
        wait_for_status(&backend, id, JobStatus::DeadLettered).await;
        pool.shutdown().await;

        assert_eq!(*handler.attempts.lock().unwrap(), vec![1]);
        assert_eq!(handler.failed.lock().unwrap().len(), 1);
    }

    struct SlowHandler {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn handle(&self, _job: &Job) -> Result<(), JobError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_failed(&self, _job: &Job, _error: &JobError) {}
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_pool_size() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = ExecutionQueue::new(backend.clone(), fast_config(3));
        let handler = Arc::new(SlowHandler { in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let pool = queue.spawn_workers(handler.clone());

        let mut ids = Vec::new();
        for _ in 0..9 {
            let id = Uuid::new_v4();
            queue.enqueue(id, json!({}), EnqueueOptions::immediate()).await.unwrap();
            ids.push(id);
        }
        for id in &ids {
            wait_for_status(&backend, *id, JobStatus::Completed).await;
        }
        pool.shutdown().await;

        let peak = handler.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {peak}");
        assert!(peak >= 2, "jobs never overlapped (peak {peak})");
    }

    #[tokio::test]
    async fn enqueue_applies_delay_and_attempt_override() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = ExecutionQueue::new(backend.clone(), fast_config(1));

        let job = queue
            .enqueue(
                Uuid::new_v4(),
                json!({ "k": "v" }),
                EnqueueOptions { delay: Some(Duration::from_secs(60)), max_attempts: Some(1) },
            )
            .await
            .unwrap();

        assert_eq!(job.max_attempts, 1);
        assert!(job.run_at > Utc::now() + chrono::Duration::seconds(50));
        assert!(backend.claim(Utc::now()).await.unwrap().is_none());
    }

    /// Counts heartbeats on top of the in-memory backend.
    struct CountingBackend {
        inner: MemoryBackend,
        heartbeats: AtomicUsize,
    }

    #[async_trait]
    impl QueueBackend for CountingBackend {
        async fn push(&self, job: Job) -> Result<(), QueueError> {
            self.inner.push(job).await
        }
        async fn claim(&self, now: chrono::DateTime<Utc>) -> Result<Option<Job>, QueueError> {
            self.inner.claim(now).await
        }
        async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
            self.inner.complete(job_id).await
        }
        async fn retry_at(&self, job_id: Uuid, run_at: chrono::DateTime<Utc>) -> Result<(), QueueError> {
            self.inner.retry_at(job_id, run_at).await
        }
        async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
            self.inner.dead_letter(job_id, error).await
        }
        async fn heartbeat(&self, _job_id: Uuid) -> Result<(), QueueError> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn long_running_job_is_heartbeated() {
        let backend = Arc::new(CountingBackend { inner: MemoryBackend::new(), heartbeats: AtomicUsize::new(0) });
        let config = QueueConfig { heartbeat_interval: Duration::from_millis(5), ..fast_config(1) };
        let queue = ExecutionQueue::new(backend.clone(), config);
        let handler = Arc::new(SlowHandler { in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) });
        let pool = queue.spawn_workers(handler);

        let id = Uuid::new_v4();
        queue.enqueue(id, json!({}), EnqueueOptions::immediate()).await.unwrap();
        wait_for_status(&backend.inner, id, JobStatus::Completed).await;
        pool.shutdown().await;

        assert!(backend.heartbeats.load(Ordering::SeqCst) >= 2);
    }

    /// Hands out one job that a dead worker already took on its last attempt.
    struct ReclaimedBackend {
        job: Mutex<Option<Job>>,
        dead: Mutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl QueueBackend for ReclaimedBackend {
        async fn push(&self, _job: Job) -> Result<(), QueueError> {
            Ok(())
        }
        async fn claim(&self, _now: chrono::DateTime<Utc>) -> Result<Option<Job>, QueueError> {
            Ok(self.job.lock().unwrap().take())
        }
        async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
            Err(QueueError::NotFound(job_id))
        }
        async fn retry_at(&self, job_id: Uuid, _run_at: chrono::DateTime<Utc>) -> Result<(), QueueError> {
            Err(QueueError::NotFound(job_id))
        }
        async fn dead_letter(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
            self.dead.lock().unwrap().push((job_id, error.to_owned()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn reclaimed_job_past_its_last_attempt_is_not_rerun() {
        let mut job = Job::new(Uuid::new_v4(), json!({}), 3, Utc::now());
        job.attempts = 4;
        let id = job.id;
        let backend = Arc::new(ReclaimedBackend { job: Mutex::new(Some(job)), dead: Mutex::new(Vec::new()) });
        let queue = ExecutionQueue::new(backend.clone(), fast_config(1));
        let handler = ScriptedHandler::new(0, JobError::Retryable("unused".into()));
        let pool = queue.spawn_workers(handler.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.dead.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job was never dead-lettered");
        pool.shutdown().await;

        assert!(handler.attempts.lock().unwrap().is_empty());
        let failed = handler.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(matches!(&failed[0], (fid, JobError::Permanent(_)) if *fid == id));
        assert_eq!(backend.dead.lock().unwrap()[0].0, id);
    }
}
