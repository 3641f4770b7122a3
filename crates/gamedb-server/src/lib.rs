//! GameDB Server Library
//!
//! Administrative HTTP backend for the sports-event database.
//!
//! # Overview
//!
//! - **Game administration**: patch the metadata of a single game
//! - **Bulk import**: upload a zip of JSON game records; each entry is staged
//!   durably and processed by a background job
//!
//! # Import pipeline
//!
//! ```text
//! upload -> ArchiveSplitter -> StagingStore::put (xN)
//!        -> JobQueue::enqueue (xN, after every entry is staged)
//!        -> WorkerPool -> ItemProcessor -> GamesImporter
//!        -> CleanupCoordinator::finalize
//! ```
//!
//! Delivery is at-least-once, so the processor treats a missing payload as
//! "already handled". A per-process active-handle guard keeps one handle from
//! being processed twice at the same time.
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP routing and extractors
//! - **SQLx**: PostgreSQL access and migrations
//! - **aws-sdk-s3**: durable payload staging
//! - **Tower**: middleware
//!
//! # Example
//!
//! ```no_run
//! use gamedb_server::{api, config::Config};
//!
//! # async fn run(state: gamedb_server::features::FeatureState) -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let app = api::router(&config, state);
//! # let _ = app;
//! # Ok(())
//! # }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod storage;

pub use error::AppError;
