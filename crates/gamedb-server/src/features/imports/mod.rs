//! Bulk import of game records
//!
//! `POST /import` stages every file of an uploaded zip and schedules one job
//! per file. `POST /import-task` runs a single payload synchronously and
//! `GET /import/jobs/:id` reports a job's state.

pub mod commands;
pub mod queries;
pub mod routes;

use crate::config::ImportConfig;
use std::time::Duration;

pub use routes::imports_routes;

#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// Delay before a scheduled job becomes due
    pub task_delay: Duration,
    pub max_attempts: i32,
    pub max_upload_bytes: usize,
    pub max_entry_bytes: u64,
}

impl From<&ImportConfig> for ImportSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            task_delay: config.task_delay(),
            max_attempts: config.max_attempts,
            max_upload_bytes: config.max_upload_bytes,
            max_entry_bytes: config.max_entry_bytes,
        }
    }
}
