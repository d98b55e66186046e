//! Execution repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::ExecutionRow};

const EXECUTION_COLUMNS: &str =
    "id, workflow_id, status, started_at, completed_at, result, error";

/// Create a new workflow execution record in `pending` status.
pub async fn create_execution(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        r#"
        INSERT INTO workflow_executions (id, workflow_id, status, started_at)
        VALUES ($1, $2, 'pending', $3)
        RETURNING {EXECUTION_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(workflow_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch one execution.
pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query_as::<_, ExecutionRow>(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Update status, result and error of an execution that has not reached a
/// terminal state yet. `completed_at` is stamped when `status` is terminal.
///
/// `result`/`error` left as `None` keep their stored value.
///
/// Returns `DbError::NotFound` when the row is missing *or* already
/// terminal; callers that care can disambiguate with [`get_execution`].
pub async fn update_execution(
    pool: &PgPool,
    execution_id: Uuid,
    status: &str,
    result: Option<serde_json::Value>,
    error: Option<&str>,
) -> Result<(), DbError> {
    let terminal = matches!(status, "completed" | "failed");

    let outcome = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status       = $1,
            result       = COALESCE($2, result),
            error        = COALESCE($3, error),
            completed_at = CASE WHEN $4 THEN $5 ELSE completed_at END
        WHERE id = $6
          AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(status)
    .bind(result)
    .bind(error)
    .bind(terminal)
    .bind(Utc::now())
    .bind(execution_id)
    .execute(pool)
    .await?;

    if outcome.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
