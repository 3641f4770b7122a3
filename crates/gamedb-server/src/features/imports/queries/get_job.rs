//! Get import job query
//!
//! Reports the state of one scheduled import job by id.

use crate::ingest::queue::{JobQueue, JobRecord, JobStatus, QueueError};
use crate::ingest::ImportGameParams;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct GetImportJobQuery {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportJobResponse {
    pub id: Uuid,
    pub operation: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<JobRecord> for ImportJobResponse {
    fn from(job: JobRecord) -> Self {
        let params = serde_json::from_value::<ImportGameParams>(job.params).ok();
        let (handle, entry_name, batch_id) = match params {
            Some(p) => (Some(p.handle.to_string()), p.entry_name, p.batch_id),
            None => (None, None, None),
        };

        Self {
            id: job.id,
            operation: job.operation,
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            handle,
            entry_name,
            batch_id,
            last_error: job.last_error,
            run_at: job.run_at,
            created_at: job.created_at,
            updated_at: job.updated_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GetImportJobError {
    #[error("Import job {0} not found")]
    NotFound(Uuid),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub async fn handle(
    queue: &dyn JobQueue,
    query: GetImportJobQuery,
) -> Result<ImportJobResponse, GetImportJobError> {
    queue
        .get(query.id)
        .await?
        .map(ImportJobResponse::from)
        .ok_or(GetImportJobError::NotFound(query.id))
}
