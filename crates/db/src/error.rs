//! Error type for the persistence layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// No row matched: the id is unknown, or a guarded update (terminal
    /// execution, settled job) left it untouched.
    #[error("no matching row")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
