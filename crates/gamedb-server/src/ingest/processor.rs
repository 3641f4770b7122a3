//! Processing of a single staged payload
//!
//! ```text
//! get(handle) ── NotFound ──────────────────────────> Succeeded (already handled)
//!      │
//!      └─ import ── ok ──────────────> finalize ─────> Succeeded
//!                ├─ parse failure ──> finalize ─────> Failed
//!                └─ transient ── final attempt ─> finalize ─> Failed
//!                               └─ otherwise ───> Err (retried, payload kept)
//! ```

use super::cleanup::CleanupCoordinator;
use super::error::{ErrorClass, IngestError};
use super::importer::{GamesImporter, ImportError, ImportSummary};
use super::jobs::{ImportGameParams, IMPORT_GAME_OPERATION};
use super::queue::{ClaimedJob, JobOutcome};
use super::worker::JobHandler;
use crate::storage::{StagingError, StagingStore};
use async_trait::async_trait;
use gamedb_common::PayloadHandle;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub class: ErrorClass,
    pub message: String,
}

/// Terminal outcome for one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestResult {
    pub handle: PayloadHandle,
    pub state: ItemState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ImportSummary>,
    /// The payload was gone, so an earlier delivery already processed it
    pub already_handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl IngestResult {
    fn succeeded(handle: &PayloadHandle, summary: ImportSummary) -> Self {
        Self {
            handle: handle.clone(),
            state: ItemState::Succeeded,
            summary: Some(summary),
            already_handled: false,
            error: None,
        }
    }

    fn already_handled(handle: &PayloadHandle) -> Self {
        Self {
            handle: handle.clone(),
            state: ItemState::Succeeded,
            summary: None,
            already_handled: true,
            error: None,
        }
    }

    fn failed(handle: &PayloadHandle, err: &IngestError) -> Self {
        Self {
            handle: handle.clone(),
            state: ItemState::Failed,
            summary: None,
            already_handled: false,
            error: Some(ItemError {
                class: err.class(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == ItemState::Succeeded
    }
}

impl From<ImportError> for IngestError {
    fn from(err: ImportError) -> Self {
        if err.is_transient() {
            IngestError::Storage(anyhow::Error::new(err))
        } else {
            IngestError::ParseFailure(err.to_string())
        }
    }
}

type ActiveHandles = Arc<Mutex<HashSet<PayloadHandle>>>;

/// Marks a handle as in flight until dropped
struct ActiveGuard {
    active: ActiveHandles,
    handle: PayloadHandle,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.handle);
        }
    }
}

pub struct ItemProcessor {
    staging: Arc<dyn StagingStore>,
    importer: Arc<dyn GamesImporter>,
    cleanup: Arc<CleanupCoordinator>,
    active: ActiveHandles,
}

impl ItemProcessor {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        importer: Arc<dyn GamesImporter>,
        cleanup: Arc<CleanupCoordinator>,
    ) -> Self {
        Self {
            staging,
            importer,
            cleanup,
            active: Arc::default(),
        }
    }

    fn acquire(&self, handle: &PayloadHandle) -> Result<ActiveGuard, IngestError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| IngestError::Busy(handle.clone()))?;
        if !active.insert(handle.clone()) {
            return Err(IngestError::Busy(handle.clone()));
        }
        Ok(ActiveGuard {
            active: self.active.clone(),
            handle: handle.clone(),
        })
    }

    pub fn is_active(&self, handle: &PayloadHandle) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(handle))
            .unwrap_or(false)
    }

    /// Process one payload.
    ///
    /// `Ok` is a terminal outcome and the payload has been cleaned up.
    /// `Err` means a later attempt may succeed; the payload is kept. With
    /// `final_attempt` set, transient failures are reported as terminal too.
    #[instrument(skip(self, handle), fields(handle = %handle))]
    pub async fn process(
        &self,
        handle: &PayloadHandle,
        final_attempt: bool,
    ) -> Result<IngestResult, IngestError> {
        let _guard = self.acquire(handle)?;

        let payload = match self.staging.get(handle).await {
            Ok(payload) => payload,
            Err(StagingError::NotFound(_)) => {
                info!("Payload already handled");
                return Ok(IngestResult::already_handled(handle));
            },
            Err(e) => return self.transient(handle, e.into(), final_attempt).await,
        };

        match self.importer.import(payload).await {
            Ok(summary) => {
                self.cleanup.finalize(handle).await;
                info!(
                    records = summary.records,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    "Payload imported"
                );
                Ok(IngestResult::succeeded(handle, summary))
            },
            Err(e) if !e.is_transient() => {
                let err = IngestError::from(e);
                error!(error = %err, "Payload rejected");
                self.cleanup.finalize(handle).await;
                Ok(IngestResult::failed(handle, &err))
            },
            Err(e) => self.transient(handle, e.into(), final_attempt).await,
        }
    }

    async fn transient(
        &self,
        handle: &PayloadHandle,
        err: IngestError,
        final_attempt: bool,
    ) -> Result<IngestResult, IngestError> {
        if final_attempt {
            error!(error = %err, "Giving up on payload");
            self.cleanup.finalize(handle).await;
            Ok(IngestResult::failed(handle, &err))
        } else {
            warn!(error = %err, "Payload import failed, will retry");
            Err(err)
        }
    }
}

#[async_trait]
impl JobHandler for ItemProcessor {
    fn operation(&self) -> &'static str {
        IMPORT_GAME_OPERATION
    }

    async fn run(&self, job: &ClaimedJob) -> Result<JobOutcome, IngestError> {
        let params: ImportGameParams = match serde_json::from_value(job.params.clone()) {
            Ok(params) => params,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Invalid import job parameters");
                return Ok(JobOutcome::Failed(format!("invalid job parameters: {}", e)));
            },
        };

        let result = self.process(&params.handle, job.is_final_attempt()).await?;
        Ok(match result.error {
            None => JobOutcome::Succeeded,
            Some(error) => JobOutcome::Failed(format!("{}: {}", error.class, error.message)),
        })
    }

    async fn abandon(&self, job: &ClaimedJob, reason: &str) {
        match serde_json::from_value::<ImportGameParams>(job.params.clone()) {
            Ok(params) => {
                error!(job_id = %job.id, handle = %params.handle, reason, "Import job abandoned");
                self.cleanup.finalize(&params.handle).await;
            },
            Err(_) => error!(job_id = %job.id, reason, "Import job abandoned"),
        }
    }
}
