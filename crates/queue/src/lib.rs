//! `queue` crate — job intake, worker dispatch, and retry policy.
//!
//! Payloads are opaque JSON; the queue never inspects them. Storage is
//! abstracted behind [`QueueBackend`] so the same worker pool runs against
//! the in-memory backend (tests, single-process deployments) or the
//! Postgres-backed one in the `db` crate.

pub mod backend;
pub mod error;
pub mod job;
pub mod retry;
pub mod worker;

pub use backend::{MemoryBackend, QueueBackend};
pub use error::{JobError, QueueError};
pub use job::{EnqueueOptions, Job, JobStatus};
pub use retry::RetryPolicy;
pub use worker::{ExecutionQueue, JobHandler, QueueConfig, WorkerPool};
