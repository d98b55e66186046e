//! Workflow reads. Definitions are written by the CRUD layer; the engine
//! only reads them and records when they last ran.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WorkflowRow};

const WORKFLOW_COLUMNS: &str =
    "id, user_id, name, description, is_active, trigger, actions, last_run";

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return every active workflow, oldest first.
pub async fn list_active_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE is_active ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Set `last_run`.
///
/// Returns `DbError::NotFound` if the workflow no longer exists.
pub async fn touch_last_run(
    pool: &PgPool,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE workflows SET last_run = $1 WHERE id = $2")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
