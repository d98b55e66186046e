//! One module per table the engine touches.
//!
//! Functions take a `&PgPool` and return `Result<T, DbError>`. Rows come
//! back as the structs in [`crate::models`]; mapping to domain types is the
//! caller's job.

pub mod executions;
pub mod jobs;
pub mod workflows;
