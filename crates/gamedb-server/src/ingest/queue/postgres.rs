//! `import_jobs` table backend
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so any number of workers, in any
//! number of processes, can poll the same table.

use super::{
    ClaimedJob, Enqueued, JobOutcome, JobQueue, JobRecord, JobRequest, JobStatus, QueueError,
    RetryDecision,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    operation: String,
    params: serde_json::Value,
    dedupe_key: Option<String>,
    status: String,
    attempts: i32,
    max_attempts: i32,
    run_at: DateTime<Utc>,
    locked_by: Option<String>,
    locked_until: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            operation: row.operation,
            params: row.params,
            dedupe_key: row.dedupe_key,
            status: JobStatus::from(row.status),
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            run_at: row.run_at,
            locked_by: row.locked_by,
            locked_until: row.locked_until,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ClaimRow {
    id: Uuid,
    operation: String,
    params: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
}

#[async_trait]
impl JobQueue for PgJobQueue {
    #[instrument(skip(self, request), fields(operation = %request.operation))]
    async fn enqueue(&self, request: JobRequest) -> Result<Enqueued, QueueError> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO import_jobs (id, operation, params, dedupe_key, max_attempts, run_at)
            VALUES ($1, $2, $3, $4, $5, NOW() + make_interval(secs => $6))
            ON CONFLICT (operation, dedupe_key)
                WHERE status IN ('pending', 'processing') AND dedupe_key IS NOT NULL
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.operation)
        .bind(&request.params)
        .bind(&request.dedupe_key)
        .bind(request.max_attempts)
        .bind(request.delay.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match id {
            Some(id) => {
                debug!(job_id = %id, "Job enqueued");
                Enqueued::Created(id)
            },
            None => Enqueued::Duplicate,
        })
    }

    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<ClaimedJob>, QueueError> {
        let row: Option<ClaimRow> = sqlx::query_as(
            r#"
            UPDATE import_jobs
            SET status = 'processing',
                attempts = attempts + 1,
                locked_by = $1,
                locked_until = NOW() + make_interval(secs => $2),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM import_jobs
                WHERE (status = 'pending' AND run_at <= NOW())
                   OR (status = 'processing' AND locked_until <= NOW())
                ORDER BY run_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, operation, params, attempts, max_attempts
            "#,
        )
        .bind(worker_id)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ClaimedJob {
            id: row.id,
            operation: row.operation,
            params: row.params,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
        }))
    }

    async fn complete(&self, id: Uuid, worker_id: &str, outcome: &JobOutcome) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = $3,
                last_error = COALESCE($4, last_error),
                locked_by = NULL,
                locked_until = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND locked_by = $2 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(outcome.status().as_str())
        .bind(outcome.error())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(id));
        }
        Ok(())
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        backoff: Duration,
    ) -> Result<RetryDecision, QueueError> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE import_jobs
            SET status = CASE
                    WHEN attempts >= max_attempts THEN 'failed'
                    ELSE 'pending'
                END,
                run_at = CASE
                    WHEN attempts >= max_attempts THEN run_at
                    ELSE NOW() + make_interval(secs => $4)
                END,
                finished_at = CASE
                    WHEN attempts >= max_attempts THEN NOW()
                    ELSE NULL
                END,
                last_error = $3,
                locked_by = NULL,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1 AND locked_by = $2 AND status = 'processing'
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(backoff.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        match status.map(JobStatus::from) {
            Some(JobStatus::Failed) => Ok(RetryDecision::Exhausted),
            Some(_) => Ok(RetryDecision::Scheduled),
            None => Err(QueueError::LeaseLost(id)),
        }
    }

    async fn release(&self, id: Uuid, worker_id: &str, delay: Duration) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = 'pending',
                attempts = GREATEST(attempts - 1, 0),
                run_at = NOW() + make_interval(secs => $3),
                locked_by = NULL,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1 AND locked_by = $2 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseLost(id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, operation, params, dedupe_key, status, attempts, max_attempts,
                   run_at, locked_by, locked_until, last_error,
                   created_at, updated_at, finished_at
            FROM import_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(JobRecord::from))
    }

    async fn has_active(&self, operation: &str, dedupe_key: &str) -> Result<bool, QueueError> {
        let active: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM import_jobs
                WHERE operation = $1
                  AND dedupe_key = $2
                  AND status IN ('pending', 'processing')
            )
            "#,
        )
        .bind(operation)
        .bind(dedupe_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(active)
    }
}
