//! Error taxonomy for the import pipeline

use super::queue::QueueError;
use crate::storage::StagingError;
use gamedb_common::PayloadHandle;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Archive entry {name} exceeds the {limit} byte entry limit")]
    PayloadTooLarge { name: String, limit: u64 },

    #[error("Payload not found: {0}")]
    NotFound(PayloadHandle),

    #[error("Failed to parse payload: {0}")]
    ParseFailure(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Payload is already being processed: {0}")]
    Busy(PayloadHandle),
}

/// Coarse classification reported with every failed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Unauthorized,
    Validation,
    MalformedArchive,
    PayloadTooLarge,
    NotFound,
    ParseFailure,
    Storage,
    Queue,
    Busy,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Unauthorized => "unauthorized",
            ErrorClass::Validation => "validation",
            ErrorClass::MalformedArchive => "malformed_archive",
            ErrorClass::PayloadTooLarge => "payload_too_large",
            ErrorClass::NotFound => "not_found",
            ErrorClass::ParseFailure => "parse_failure",
            ErrorClass::Storage => "storage",
            ErrorClass::Queue => "queue",
            ErrorClass::Busy => "busy",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IngestError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IngestError::Unauthorized(_) => ErrorClass::Unauthorized,
            IngestError::Validation(_) => ErrorClass::Validation,
            IngestError::MalformedArchive(_) => ErrorClass::MalformedArchive,
            IngestError::PayloadTooLarge { .. } => ErrorClass::PayloadTooLarge,
            IngestError::NotFound(_) => ErrorClass::NotFound,
            IngestError::ParseFailure(_) => ErrorClass::ParseFailure,
            IngestError::Storage(_) => ErrorClass::Storage,
            IngestError::Queue(_) => ErrorClass::Queue,
            IngestError::Busy(_) => ErrorClass::Busy,
        }
    }

    /// Whether a later attempt could succeed without the input changing
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::Storage(_) | IngestError::Queue(_) | IngestError::Busy(_)
        )
    }
}

impl From<StagingError> for IngestError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::NotFound(handle) => IngestError::NotFound(handle),
            StagingError::Backend(e) => IngestError::Storage(e),
            StagingError::Io(e) => {
                IngestError::Storage(anyhow::Error::new(e).context("Staging stream failed"))
            },
        }
    }
}
