//! Durable staging of uploaded payloads
//!
//! A payload is written once under a freshly generated [`PayloadHandle`] and
//! lives until a processing job reaches a terminal state (or the orphan sweep
//! finds it). `delete` is idempotent so cleanup can run more than once.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use gamedb_common::PayloadHandle;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::{StagingBackend, StorageConfig};
pub use memory::MemoryStagingStore;
pub use s3::S3StagingStore;

/// Chunked payload body
pub type PayloadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Chunk size used when a buffered payload is handed to a store
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Payload not found: {0}")]
    NotFound(PayloadHandle),

    #[error("Staging backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("IO error while streaming payload: {0}")]
    Io(#[from] std::io::Error),
}

/// Returned by [`StagingStore::put`] once the payload is retrievable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedReceipt {
    pub handle: PayloadHandle,
    pub size: u64,
    /// Hex SHA-256 of the staged bytes
    pub checksum: String,
}

pub struct StagedPayload {
    pub handle: PayloadHandle,
    pub content_type: String,
    pub size: u64,
    pub body: PayloadStream,
}

impl std::fmt::Debug for StagedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedPayload")
            .field("handle", &self.handle)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl StagedPayload {
    /// Drain the body into one buffer
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        collect_stream(self.body).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    pub handle: PayloadHandle,
    pub staged_at: DateTime<Utc>,
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Persist `body` under a new handle. `name` is the entry name inside the
    /// upload and is only used for diagnostics.
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        body: PayloadStream,
    ) -> Result<StagedReceipt, StagingError>;

    /// Open a staged payload. Unknown or deleted handles are `NotFound`.
    async fn get(&self, handle: &PayloadHandle) -> Result<StagedPayload, StagingError>;

    /// Remove a payload. Deleting a missing handle succeeds.
    async fn delete(&self, handle: &PayloadHandle) -> Result<(), StagingError>;

    async fn list_staged(&self) -> Result<Vec<StagedObject>, StagingError>;
}

/// Build the configured staging backend
pub async fn init(config: &StorageConfig) -> anyhow::Result<Arc<dyn StagingStore>> {
    info!(backend = ?config.backend, prefix = %config.prefix, "Initializing staging store");
    Ok(match config.backend {
        StagingBackend::S3 => Arc::new(S3StagingStore::new(config.clone()).await?),
        StagingBackend::Memory => Arc::new(MemoryStagingStore::new()),
    })
}

/// Split an in-memory buffer into a chunked stream
pub fn stream_from_bytes(data: Bytes, chunk_size: usize) -> PayloadStream {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut rest = data;
    while rest.len() > chunk_size {
        chunks.push(Ok(rest.split_to(chunk_size)));
    }
    if !rest.is_empty() {
        chunks.push(Ok(rest));
    }
    stream::iter(chunks).boxed()
}

pub async fn collect_stream(body: PayloadStream) -> std::io::Result<Bytes> {
    let buffer = body
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok(buffer.freeze())
}
