//! Shared helpers for the HTTP integration tests
//!
//! The app is assembled exactly as in `main`, except that every backend is
//! the in-memory one, so no database or object store is needed.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use gamedb_server::{
    api,
    config::Config,
    db::MemoryGameStore,
    features::FeatureState,
    ingest::{JsonGamesImporter, MemoryJobQueue, WorkerPool, WorkerSettings},
    middleware::TokenAuthorizer,
    storage::MemoryStagingStore,
};
use serde_json::Value;
use std::io::{Cursor, Write};
use std::sync::Arc;
use tower::ServiceExt;
use zip::{write::SimpleFileOptions, ZipWriter};

pub const ADMIN_TOKEN: &str = "integration-admin-token";
const BOUNDARY: &str = "gamedb-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: FeatureState,
    pub staging: Arc<MemoryStagingStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub games: Arc<MemoryGameStore>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// App whose config is adjusted by `configure` before assembly
    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.admin.tokens = vec![ADMIN_TOKEN.to_string()];
        config.import.task_delay_ms = 0;
        configure(&mut config);

        let staging = Arc::new(MemoryStagingStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let games = Arc::new(MemoryGameStore::new());
        let state = FeatureState::new(
            staging.clone(),
            queue.clone(),
            games.clone(),
            Arc::new(JsonGamesImporter::new(games.clone())),
            Arc::new(TokenAuthorizer::new(config.admin.tokens.clone())),
            &config.import,
        );

        Self {
            router: api::router(&config, state.clone()),
            state,
            staging,
            queue,
            games,
        }
    }

    pub fn worker_pool(&self) -> WorkerPool {
        self.state.worker_pool(WorkerSettings::default())
    }

    /// Run every due job to completion
    pub async fn drain_jobs(&self) -> usize {
        self.queue.make_all_due().await;
        self.worker_pool().drain("test-worker").await.unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn upload(&self, archive: Bytes, token: Option<&str>) -> (StatusCode, Value) {
        self.send(upload_request(archive, token)).await
    }

    pub async fn post_json(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }
}

pub fn upload_request(archive: Bytes, token: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"games.zip\"\r\nContent-Type: application/zip\r\n\r\n",
            b = BOUNDARY
        )
        .as_bytes(),
    );
    body.extend_from_slice(&archive);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/admin/games/import")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Zip of `(name, content)` entries; names ending in `/` become directories
pub fn zip_of(entries: &[(&str, &str)]) -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

/// Rewrite every occurrence of `from` in an archive's headers to `to`.
/// ZipWriter refuses duplicate names, so this is how tests build them.
pub fn rename_entries(archive: Bytes, from: &str, to: &str) -> Bytes {
    assert_eq!(from.len(), to.len());
    let mut raw = archive.to_vec();
    let mut offset = 0;
    while let Some(found) = raw[offset..]
        .windows(from.len())
        .position(|w| w == from.as_bytes())
    {
        let at = offset + found;
        raw[at..at + to.len()].copy_from_slice(to.as_bytes());
        offset = at + to.len();
    }
    Bytes::from(raw)
}

pub fn game_json(short_name: &str, year: i32) -> String {
    serde_json::json!({
        "event": { "short_name": short_name, "name": format!("{} championships", short_name) },
        "year": year,
    })
    .to_string()
}
