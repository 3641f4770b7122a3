//! Removal of staged payloads
//!
//! Payloads are deleted once their job is terminal, when the upload that
//! staged them fails before scheduling, and by a periodic sweep that catches
//! payloads left behind by a crash between staging and scheduling.

use super::error::IngestError;
use super::jobs::IMPORT_GAME_OPERATION;
use super::queue::JobQueue;
use crate::storage::StagingStore;
use chrono::Utc;
use gamedb_common::PayloadHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    /// Old payloads kept because a job still references them
    pub kept: usize,
}

pub struct CleanupCoordinator {
    staging: Arc<dyn StagingStore>,
    queue: Arc<dyn JobQueue>,
}

impl CleanupCoordinator {
    pub fn new(staging: Arc<dyn StagingStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { staging, queue }
    }

    /// Delete a payload after its job reached a terminal state.
    /// Failures are logged; the sweep retries them later.
    pub async fn finalize(&self, handle: &PayloadHandle) {
        match self.staging.delete(handle).await {
            Ok(()) => debug!(handle = %handle, "Staged payload removed"),
            Err(e) => warn!(handle = %handle, error = %e, "Failed to remove staged payload"),
        }
    }

    /// Delete the payloads of an upload that never reached scheduling.
    /// Returns how many deletes succeeded.
    pub async fn rollback(&self, handles: &[PayloadHandle]) -> usize {
        let mut deleted = 0;
        for handle in handles {
            match self.staging.delete(handle).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    error!(handle = %handle, error = %e, "Failed to roll back staged payload")
                },
            }
        }
        if !handles.is_empty() {
            info!(deleted, total = handles.len(), "Rolled back staged payloads");
        }
        deleted
    }

    /// Delete payloads staged before `now - older_than` that no active job
    /// refers to.
    pub async fn sweep_orphans(&self, older_than: Duration) -> Result<SweepReport, IngestError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(SweepReport::default());
        };

        let staged = self.staging.list_staged().await?;
        let mut report = SweepReport {
            scanned: staged.len(),
            ..Default::default()
        };

        for object in staged.into_iter().filter(|o| o.staged_at < cutoff) {
            if self
                .queue
                .has_active(IMPORT_GAME_OPERATION, object.handle.as_str())
                .await?
            {
                report.kept += 1;
                continue;
            }
            self.staging.delete(&object.handle).await?;
            report.deleted += 1;
            info!(handle = %object.handle, staged_at = %object.staged_at, "Deleted orphaned payload");
        }

        Ok(report)
    }

    /// Run [`Self::sweep_orphans`] every `interval` until `shutdown` flips.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        ttl: Duration,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {},
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                match self.sweep_orphans(ttl).await {
                    Ok(report) if report.deleted > 0 || report.kept > 0 => {
                        info!(?report, "Orphan sweep finished")
                    },
                    Ok(_) => debug!("Orphan sweep found nothing"),
                    Err(e) => error!(error = %e, "Orphan sweep failed"),
                }
            }

            debug!("Orphan sweeper stopped");
        })
    }
}
