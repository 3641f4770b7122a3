//! Bulk import pipeline
//!
//! - [`archive`]: splits an uploaded zip into payloads
//! - [`queue`]: durable deferred job delivery
//! - [`processor`]: imports one staged payload
//! - [`cleanup`]: deletes payloads that are done or orphaned
//! - [`worker`]: pool of tasks draining the queue

pub mod archive;
pub mod cleanup;
pub mod error;
pub mod importer;
pub mod jobs;
pub mod processor;
pub mod queue;
pub mod worker;

pub use archive::{ArchiveEntry, ArchiveSplitter};
pub use cleanup::{CleanupCoordinator, SweepReport};
pub use error::{ErrorClass, IngestError};
pub use importer::{GamesImporter, ImportError, ImportSummary, JsonGamesImporter};
pub use jobs::{ImportGameParams, IMPORT_GAME_OPERATION};
pub use processor::{IngestResult, ItemProcessor, ItemState};
pub use queue::{JobQueue, MemoryJobQueue, PgJobQueue};
pub use worker::{JobHandler, WorkerPool, WorkerSettings};
