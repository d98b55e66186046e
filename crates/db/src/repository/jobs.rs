//! Job queue repository functions.
//!
//! The durable queue is backed by the `job_queue` Postgres table.
//! Workers poll the table and use `SELECT … FOR UPDATE SKIP LOCKED`
//! for safe concurrent processing.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::JobRow};

/// Insert a pending job.
///
/// Returns `Ok(false)` if a job with the same ID already exists.
pub async fn enqueue_job(
    pool: &PgPool,
    id: Uuid,
    payload: serde_json::Value,
    max_attempts: i32,
    run_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO job_queue
            (id, status, attempts, max_attempts, payload, run_at, created_at, updated_at)
        VALUES ($1, 'pending', 0, $2, $3, $4, $5, $5)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(max_attempts)
    .bind(payload)
    .bind(run_at)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Atomically fetch the oldest due job and mark it as `processing`.
///
/// A job is due when it is `pending` with `run_at <= now`, or when it is
/// `processing` but was last heartbeated before `stale_before` (its worker
/// died). A reclaimed job that had used its last attempt comes back with
/// `attempts > max_attempts`; the worker finalizes it without running it.
///
/// Uses `SELECT … FOR UPDATE SKIP LOCKED` so multiple workers (and
/// multiple processes) can poll safely without stepping on each other.
///
/// Returns `None` if no job is due.
pub async fn fetch_next_job(
    pool: &PgPool,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, status, attempts, max_attempts, payload, last_error, run_at, created_at, updated_at
        FROM job_queue
        WHERE (status = 'pending' AND run_at <= $1)
           OR (status = 'processing' AND updated_at < $2)
        ORDER BY run_at ASC, created_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(now)
    .bind(stale_before)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(mut job) = row else {
        tx.rollback().await?;
        return Ok(None);
    };

    sqlx::query(
        r#"
        UPDATE job_queue
        SET status = 'processing', attempts = attempts + 1, updated_at = $1
        WHERE id = $2
        "#,
    )
    .bind(Utc::now())
    .bind(job.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    job.status = "processing".into();
    job.attempts += 1;
    Ok(Some(job))
}

/// Extend the lease of a running job.
pub async fn touch_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE job_queue
        SET updated_at = $1
        WHERE id = $2 AND status = 'processing'
        "#,
    )
    .bind(Utc::now())
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Mark a job as completed.
pub async fn complete_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    set_status(pool, job_id, "completed", None, None).await
}

/// Put a job back to `pending`, claimable from `run_at`.
pub async fn reschedule_job(
    pool: &PgPool,
    job_id: Uuid,
    run_at: DateTime<Utc>,
) -> Result<(), DbError> {
    set_status(pool, job_id, "pending", Some(run_at), None).await
}

/// Mark a job as dead-lettered after its final failure.
pub async fn dead_letter_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<(), DbError> {
    set_status(pool, job_id, "dead_lettered", None, Some(error)).await
}

async fn set_status(
    pool: &PgPool,
    job_id: Uuid,
    status: &str,
    run_at: Option<DateTime<Utc>>,
    error: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE job_queue
        SET status = $1,
            run_at = COALESCE($2, run_at),
            last_error = COALESCE($3, last_error),
            updated_at = $4
        WHERE id = $5
        "#,
    )
    .bind(status)
    .bind(run_at)
    .bind(error)
    .bind(Utc::now())
    .bind(job_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
