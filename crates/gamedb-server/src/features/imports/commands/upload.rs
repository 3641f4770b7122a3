//! Upload a zip of game files for import
//!
//! Every file entry is staged before any job is scheduled. If the archive
//! turns out to be broken halfway through, the entries staged so far are
//! deleted again and nothing is scheduled.

use crate::features::FeatureState;
use crate::ingest::{
    queue::{Enqueued, JobRequest, QueueError},
    ArchiveEntry, ArchiveSplitter, ImportGameParams, IngestError, IMPORT_GAME_OPERATION,
};
use crate::middleware::AdminCapability;
use crate::storage::{stream_from_bytes, DEFAULT_CHUNK_SIZE};
use bytes::Bytes;
use gamedb_common::PayloadHandle;
use serde::Serialize;
use uuid::Uuid;

pub struct UploadArchiveCommand {
    /// Client supplied file name, for logging only
    pub file_name: Option<String>,
    pub data: Bytes,
}

impl std::fmt::Debug for UploadArchiveCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadArchiveCommand")
            .field("file_name", &self.file_name)
            .field("size", &self.data.len())
            .finish()
    }
}

impl UploadArchiveCommand {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.data.is_empty() {
            return Err(IngestError::Validation(
                "Uploaded file is empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadArchiveResponse {
    pub batch_id: Uuid,
    pub staged: usize,
    pub queued: usize,
    pub message: String,
}

struct StagedEntry {
    handle: PayloadHandle,
    name: String,
}

#[tracing::instrument(skip(state, _admin, command), fields(file_name = ?command.file_name, size = command.data.len()))]
pub async fn handle(
    state: &FeatureState,
    _admin: &AdminCapability,
    command: UploadArchiveCommand,
) -> Result<UploadArchiveResponse, IngestError> {
    command.validate()?;

    let batch_id = Uuid::new_v4();
    let splitter = ArchiveSplitter::new(command.data, state.import.max_entry_bytes)?;

    let mut staged: Vec<StagedEntry> = Vec::new();
    for entry in splitter {
        let result = match entry {
            Ok(entry) => stage(state, entry).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(entry) => staged.push(entry),
            Err(e) => {
                tracing::warn!(error = %e, staged = staged.len(), "Upload aborted while staging");
                state.cleanup.rollback(&handles(&staged)).await;
                return Err(e);
            },
        }
    }

    let mut queued = 0;
    for (index, entry) in staged.iter().enumerate() {
        match schedule(state, entry, batch_id).await {
            Ok(Enqueued::Created(job_id)) => {
                queued += 1;
                tracing::debug!(job_id = %job_id, handle = %entry.handle, "Import job scheduled");
            },
            Ok(Enqueued::Duplicate) => {
                queued += 1;
                tracing::warn!(handle = %entry.handle, "Import job already scheduled");
            },
            Err(e) => {
                tracing::error!(error = %e, queued, "Failed to schedule import jobs");
                state.cleanup.rollback(&handles(&staged[index..])).await;
                return Err(e.into());
            },
        }
    }

    tracing::info!(batch_id = %batch_id, staged = staged.len(), queued, "Archive queued for import");

    Ok(UploadArchiveResponse {
        batch_id,
        staged: staged.len(),
        queued,
        message: format!("Queued {} game files for import.", queued),
    })
}

async fn stage(state: &FeatureState, entry: ArchiveEntry) -> Result<StagedEntry, IngestError> {
    let receipt = state
        .staging
        .put(
            &entry.name,
            entry.content_type,
            stream_from_bytes(entry.content, DEFAULT_CHUNK_SIZE),
        )
        .await?;

    tracing::debug!(
        handle = %receipt.handle,
        entry = %entry.name,
        size = receipt.size,
        checksum = %receipt.checksum,
        "Entry staged"
    );

    Ok(StagedEntry {
        handle: receipt.handle,
        name: entry.name,
    })
}

async fn schedule(
    state: &FeatureState,
    entry: &StagedEntry,
    batch_id: Uuid,
) -> Result<Enqueued, QueueError> {
    let params = ImportGameParams {
        handle: entry.handle.clone(),
        entry_name: Some(entry.name.clone()),
        batch_id: Some(batch_id),
    };
    let request = JobRequest::new(IMPORT_GAME_OPERATION, serde_json::to_value(&params)?)
        .with_delay(state.import.task_delay)
        .with_dedupe_key(entry.handle.as_str())
        .with_max_attempts(state.import.max_attempts);

    state.queue.enqueue(request).await
}

fn handles(entries: &[StagedEntry]) -> Vec<PayloadHandle> {
    entries.iter().map(|e| e.handle.clone()).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::features::testing::{memory_state, zip_of};
    use crate::ingest::queue::JobStatus;

    fn command(data: Bytes) -> UploadArchiveCommand {
        UploadArchiveCommand {
            file_name: Some("games.zip".to_string()),
            data,
        }
    }

    #[tokio::test]
    async fn test_stages_and_schedules_every_file() {
        let t = memory_state();
        let data = zip_of(&[
            ("2018/", ""),
            ("2018/wucc.json", r#"{"event": {"short_name": "wucc", "name": "WUCC"}, "year": 2018}"#),
            ("2019/wmucc.json", r#"[]"#),
        ]);

        let response = handle(&t.state, &AdminCapability::for_tests(), command(data))
            .await
            .unwrap();

        assert_eq!(response.staged, 2);
        assert_eq!(response.queued, 2);
        assert_eq!(response.message, "Queued 2 game files for import.");
        assert_eq!(t.staging.len().await, 2);

        let jobs = t.queue.jobs().await;
        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.operation, IMPORT_GAME_OPERATION);
            let params: ImportGameParams = serde_json::from_value(job.params.clone()).unwrap();
            assert_eq!(params.batch_id, Some(response.batch_id));
            assert_eq!(job.dedupe_key.as_deref(), Some(params.handle.as_str()));
            assert!(t.staging.contains(&params.handle).await);
        }
    }

    #[tokio::test]
    async fn test_empty_archive_queues_nothing() {
        let t = memory_state();
        let response = handle(&t.state, &AdminCapability::for_tests(), command(zip_of(&[])))
            .await
            .unwrap();
        assert_eq!((response.staged, response.queued), (0, 0));
        assert!(t.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let t = memory_state();
        let err = handle(&t.state, &AdminCapability::for_tests(), command(Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }

    #[tokio::test]
    async fn test_not_a_zip_stages_nothing() {
        let t = memory_state();
        let err = handle(
            &t.state,
            &AdminCapability::for_tests(),
            command(Bytes::from_static(b"PK but not really")),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::MalformedArchive(_)));
        assert!(t.staging.is_empty().await);
        assert!(t.queue.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_oversize_entry_rolls_back_staged_entries() {
        let mut t = memory_state();
        t.state.import.max_entry_bytes = 8;
        let data = zip_of(&[("a.json", "[]"), ("b.json", "[1, 2, 3, 4, 5, 6]")]);

        let err = handle(&t.state, &AdminCapability::for_tests(), command(data))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::PayloadTooLarge { ref name, limit: 8 } if name == "b.json"
        ));
        assert!(t.staging.is_empty().await);
        assert!(t.queue.jobs().await.is_empty());
    }
}
