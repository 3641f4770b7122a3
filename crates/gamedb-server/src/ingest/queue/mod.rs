//! Deferred job delivery
//!
//! Jobs are rows with a `run_at` time and a lease. A worker claims a due job,
//! which bumps its attempt counter and leases it until `locked_until`. If the
//! worker disappears the lease expires and the job is delivered again, so
//! delivery is at-least-once and handlers must tolerate re-runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job is no longer leased by the calling worker
    #[error("Lease lost for job {0}")]
    LeaseLost(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => JobStatus::Processing,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub operation: String,
    pub params: serde_json::Value,
    pub delay: Duration,
    /// At most one pending or processing job may exist per
    /// `(operation, dedupe_key)`.
    pub dedupe_key: Option<String>,
    pub max_attempts: i32,
}

impl JobRequest {
    pub fn new(operation: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            operation: operation.into(),
            params,
            delay: Duration::ZERO,
            dedupe_key: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created(Uuid),
    /// An active job with the same dedupe key already exists
    Duplicate,
}

/// A job leased to one worker
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub operation: String,
    pub params: serde_json::Value,
    /// Attempts including this one
    pub attempts: i32,
    pub max_attempts: i32,
}

impl ClaimedJob {
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delivered again after the last permitted attempt lost its lease
    pub fn is_overdue(&self) -> bool {
        self.attempts > self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Succeeded => JobStatus::Succeeded,
            JobOutcome::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobOutcome::Succeeded => None,
            JobOutcome::Failed(message) => Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Scheduled,
    /// No attempts left; the job is now `failed`
    Exhausted,
}

/// Job row as stored
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub operation: String,
    pub params: serde_json::Value,
    pub dedupe_key: Option<String>,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, request: JobRequest) -> Result<Enqueued, QueueError>;

    /// Lease one due job: pending with `run_at <= now`, or processing with an
    /// expired lease.
    async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<ClaimedJob>, QueueError>;

    /// Record a terminal outcome.
    async fn complete(&self, id: Uuid, worker_id: &str, outcome: &JobOutcome) -> Result<(), QueueError>;

    /// Put the job back with `run_at = now + backoff`, or fail it when its
    /// attempts are used up.
    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        backoff: Duration,
    ) -> Result<RetryDecision, QueueError>;

    /// Hand a job back without spending an attempt.
    async fn release(&self, id: Uuid, worker_id: &str, delay: Duration) -> Result<(), QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError>;

    async fn has_active(&self, operation: &str, dedupe_key: &str) -> Result<bool, QueueError>;
}
