//! In-process staging backend for tests and local development

use super::{
    collect_stream, stream_from_bytes, PayloadStream, StagedObject, StagedPayload, StagedReceipt,
    StagingError, StagingStore, DEFAULT_CHUNK_SIZE,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use gamedb_common::{checksum::sha256_hex, PayloadHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryObject {
    content_type: String,
    data: Bytes,
    staged_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStagingStore {
    objects: RwLock<HashMap<PayloadHandle, MemoryObject>>,
    failing_gets: AtomicUsize,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn contains(&self, handle: &PayloadHandle) -> bool {
        self.objects.read().await.contains_key(handle)
    }

    /// Make the next `count` calls to `get` fail with a backend error.
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Shift a payload's staging time into the past.
    pub async fn backdate(&self, handle: &PayloadHandle, by: chrono::Duration) {
        if let Some(object) = self.objects.write().await.get_mut(handle) {
            object.staged_at -= by;
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        body: PayloadStream,
    ) -> Result<StagedReceipt, StagingError> {
        let data = collect_stream(body).await?;
        let handle = PayloadHandle::generate();
        let receipt = StagedReceipt {
            handle: handle.clone(),
            size: data.len() as u64,
            checksum: sha256_hex(&data),
        };

        debug!(handle = %handle, entry = name, size = receipt.size, "Staged payload in memory");

        self.objects.write().await.insert(
            handle,
            MemoryObject {
                content_type: content_type.to_string(),
                data,
                staged_at: Utc::now(),
            },
        );

        Ok(receipt)
    }

    async fn get(&self, handle: &PayloadHandle) -> Result<StagedPayload, StagingError> {
        if self.take_injected_failure() {
            return Err(StagingError::Backend(anyhow::anyhow!(
                "staging backend unavailable"
            )));
        }

        let object = self
            .objects
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| StagingError::NotFound(handle.clone()))?;

        Ok(StagedPayload {
            handle: handle.clone(),
            content_type: object.content_type,
            size: object.data.len() as u64,
            body: stream_from_bytes(object.data, DEFAULT_CHUNK_SIZE),
        })
    }

    async fn delete(&self, handle: &PayloadHandle) -> Result<(), StagingError> {
        self.objects.write().await.remove(handle);
        Ok(())
    }

    async fn list_staged(&self) -> Result<Vec<StagedObject>, StagingError> {
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .map(|(handle, object)| StagedObject {
                handle: handle.clone(),
                staged_at: object.staged_at,
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use gamedb_common::checksum::sha256_hex;

    fn body(data: &'static [u8]) -> PayloadStream {
        stream_from_bytes(Bytes::from_static(data), 4)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStagingStore::new();
        let receipt = store
            .put("game.json", "application/json", body(b"{\"year\":2019}"))
            .await
            .unwrap();

        assert_eq!(receipt.size, 13);
        assert_eq!(receipt.checksum, sha256_hex(b"{\"year\":2019}"));

        let payload = store.get(&receipt.handle).await.unwrap();
        assert_eq!(payload.content_type, "application/json");
        assert_eq!(&payload.into_bytes().await.unwrap()[..], b"{\"year\":2019}");
    }

    #[tokio::test]
    async fn test_handles_are_distinct_for_identical_content() {
        let store = MemoryStagingStore::new();
        let a = store.put("a", "application/json", body(b"{}")).await.unwrap();
        let b = store.put("a", "application/json", body(b"{}")).await.unwrap();
        assert_ne!(a.handle, b.handle);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStagingStore::new();
        let receipt = store.put("a", "application/json", body(b"{}")).await.unwrap();

        store.delete(&receipt.handle).await.unwrap();
        store.delete(&receipt.handle).await.unwrap();
        store.delete(&PayloadHandle::generate()).await.unwrap();

        assert!(matches!(
            store.get(&receipt.handle).await,
            Err(StagingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStagingStore::new();
        let receipt = store.put("a", "application/json", body(b"{}")).await.unwrap();
        store.fail_next_gets(1);

        assert!(matches!(
            store.get(&receipt.handle).await,
            Err(StagingError::Backend(_))
        ));
        assert!(store.get(&receipt.handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_backdate_moves_staged_at() {
        let store = MemoryStagingStore::new();
        let receipt = store.put("a", "application/json", body(b"{}")).await.unwrap();
        store.backdate(&receipt.handle, chrono::Duration::hours(2)).await;

        let listed = store.list_staged().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].staged_at < Utc::now() - chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_concurrent_get_and_delete_on_distinct_handles() {
        let store = std::sync::Arc::new(MemoryStagingStore::new());
        let keep = store.put("keep", "application/json", body(b"keep")).await.unwrap();
        let drop = store.put("drop", "application/json", body(b"drop")).await.unwrap();

        let s1 = store.clone();
        let h1 = keep.handle.clone();
        let reader = tokio::spawn(async move { s1.get(&h1).await.map(|p| p.size) });
        let s2 = store.clone();
        let h2 = drop.handle.clone();
        let deleter = tokio::spawn(async move { s2.delete(&h2).await });

        assert_eq!(reader.await.unwrap().unwrap(), 4);
        deleter.await.unwrap().unwrap();
        assert!(store.contains(&keep.handle).await);
        assert!(!store.contains(&drop.handle).await);
    }
}
