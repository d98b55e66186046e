//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, typed row structs, repository functions for
//! the tables the workflow engine touches, and a Postgres-backed
//! [`queue::QueueBackend`]. No business logic lives here.

pub mod error;
pub mod pool;
pub mod queue_backend;
pub mod repository;
pub mod models;

pub use pool::DbPool;
pub use error::DbError;
pub use queue_backend::{PgQueueBackend, DEFAULT_LEASE};
