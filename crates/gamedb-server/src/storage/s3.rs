//! S3 staging backend
//!
//! Objects live at `<prefix>/<handle>`. Bodies that fit in one part go
//! through `PutObject`; larger ones use a multipart upload that is aborted
//! if any part fails, so a failed `put` leaves nothing behind.

use super::{
    config::StorageConfig, PayloadStream, StagedObject, StagedPayload, StagedReceipt,
    StagingError, StagingStore,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use gamedb_common::{checksum::StreamingChecksum, PayloadHandle};
use tracing::{debug, info, instrument, warn};

/// Multipart part size; S3 requires at least 5 MiB for every part but the last.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct S3StagingStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3StagingStore {
    pub async fn new(config: StorageConfig) -> anyhow::Result<Self> {
        debug!("Initializing S3 staging with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "gamedb-staging",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "S3 staging initialized for bucket: {} (prefix {})",
            config.bucket, config.prefix
        );

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    fn key(&self, handle: &PayloadHandle) -> String {
        object_key(&self.prefix, handle)
    }

    async fn put_single(&self, key: &str, content_type: &str, data: Bytes) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .context("Failed to upload payload to S3")?;
        Ok(())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> anyhow::Result<CompletedPart> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("Failed to upload part {} of {}", part_number, key))?;

        Ok(CompletedPart::builder()
            .set_e_tag(response.e_tag().map(str::to_string))
            .part_number(part_number)
            .build())
    }

    /// Stream the remaining body as parts. `first` is the already-buffered
    /// first part.
    async fn put_multipart(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        body: &mut PayloadStream,
        checksum: &mut StreamingChecksum,
    ) -> Result<(), StagingError> {
        let mut parts = vec![self.upload_part(key, upload_id, 1, first).await?];
        let mut buffer = BytesMut::with_capacity(PART_SIZE);

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            checksum.update(&chunk);
            buffer.extend_from_slice(&chunk);
            if buffer.len() >= PART_SIZE {
                let part_number = parts.len() as i32 + 1;
                let data = buffer.split().freeze();
                parts.push(self.upload_part(key, upload_id, part_number, data).await?);
            }
        }

        if !buffer.is_empty() {
            let part_number = parts.len() as i32 + 1;
            parts.push(
                self.upload_part(key, upload_id, part_number, buffer.freeze())
                    .await?,
            );
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

pub(crate) fn object_key(prefix: &str, handle: &PayloadHandle) -> String {
    format!("{}/{}", prefix, handle)
}

/// Inverse of [`object_key`]; keys that are not ours yield `None`.
pub(crate) fn handle_from_key(prefix: &str, key: &str) -> Option<PayloadHandle> {
    key.strip_prefix(prefix)?
        .strip_prefix('/')?
        .parse()
        .ok()
}

#[async_trait]
impl StagingStore for S3StagingStore {
    #[instrument(skip(self, body), fields(bucket = %self.bucket))]
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        mut body: PayloadStream,
    ) -> Result<StagedReceipt, StagingError> {
        let handle = PayloadHandle::generate();
        let key = self.key(&handle);
        let mut checksum = StreamingChecksum::new();
        let mut first = BytesMut::new();
        let mut exhausted = true;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            checksum.update(&chunk);
            first.extend_from_slice(&chunk);
            if first.len() >= PART_SIZE {
                exhausted = false;
                break;
            }
        }

        if exhausted {
            self.put_single(&key, content_type, first.freeze()).await?;
        } else {
            let created = self
                .client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .content_type(content_type)
                .send()
                .await
                .context("Failed to start multipart upload")?;
            let upload_id = created
                .upload_id()
                .ok_or_else(|| anyhow!("S3 returned no upload id for {}", key))?
                .to_string();

            if let Err(e) = self
                .put_multipart(&key, &upload_id, first.freeze(), &mut body, &mut checksum)
                .await
            {
                warn!(key = %key, error = %e, "Aborting multipart upload");
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key = %key, error = %abort, "Failed to abort multipart upload");
                }
                return Err(e);
            }
        }

        let (digest, size) = checksum.finalize();
        info!(handle = %handle, entry = name, size, "Staged payload at s3://{}/{}", self.bucket, key);

        Ok(StagedReceipt {
            handle,
            size,
            checksum: digest,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, handle: &PayloadHandle) -> Result<StagedPayload, StagingError> {
        let key = self.key(handle);
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(StagingError::NotFound(handle.clone()));
                }
                return Err(StagingError::Backend(
                    anyhow::Error::new(service_error)
                        .context(format!("Failed to read s3://{}/{}", self.bucket, key)),
                ));
            },
        };

        let content_type = response
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let size = response.content_length().unwrap_or_default().max(0) as u64;

        let body = stream::unfold(response.body, |mut body| async move {
            body.next().await.map(|chunk| {
                (chunk.map_err(std::io::Error::other), body)
            })
        })
        .boxed();

        Ok(StagedPayload {
            handle: handle.clone(),
            content_type,
            size,
            body,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, handle: &PayloadHandle) -> Result<(), StagingError> {
        let key = self.key(handle);
        // S3 answers 204 for missing keys as well
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", self.bucket, key))?;

        debug!(handle = %handle, "Deleted staged payload");
        Ok(())
    }

    async fn list_staged(&self) -> Result<Vec<StagedObject>, StagingError> {
        let mut staged = Vec::new();
        let mut continuation_token: Option<String> = None;
        let list_prefix = format!("{}/", self.prefix);

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&list_prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .context("Failed to list staged payloads")?;

            for object in response.contents() {
                let Some(handle) = object
                    .key()
                    .and_then(|key| handle_from_key(&self.prefix, key))
                else {
                    continue;
                };
                let staged_at = object
                    .last_modified()
                    .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), 0))
                    .unwrap_or_else(Utc::now);
                staged.push(StagedObject { handle, staged_at });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                },
                _ => break,
            }
        }

        Ok(staged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let handle: PayloadHandle = "abc123".parse().unwrap();
        let key = object_key("staging", &handle);
        assert_eq!(key, "staging/abc123");
        assert_eq!(handle_from_key("staging", &key), Some(handle));
    }

    #[test]
    fn test_foreign_keys_are_ignored() {
        assert_eq!(handle_from_key("staging", "other/abc"), None);
        assert_eq!(handle_from_key("staging", "staging/nested/abc"), None);
        assert_eq!(handle_from_key("staging", "stagingabc"), None);
    }

    #[tokio::test]
    async fn test_client_builds_without_network() {
        let store = S3StagingStore::new(StorageConfig::for_minio("http://localhost:9000", "b"))
            .await
            .unwrap();
        assert_eq!(store.key(&"h".parse().unwrap()), "staging/h");
    }
}
