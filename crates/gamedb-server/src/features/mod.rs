//! Feature slices of the admin API
//!
//! - **games**: editing a single game's metadata
//! - **imports**: bulk import of game records from a zip upload
//!
//! Each slice keeps `commands/` (writes), `queries/` (reads) and a
//! `routes.rs` mapping HTTP onto them.

pub mod games;
pub mod imports;
pub mod shared;

use crate::config::ImportConfig;
use crate::db::GameStore;
use crate::ingest::{
    CleanupCoordinator, GamesImporter, ItemProcessor, JobQueue, WorkerPool, WorkerSettings,
};
use crate::middleware::Authorizer;
use crate::storage::StagingStore;
use axum::{extract::FromRef, Router};
use std::sync::Arc;

pub use imports::ImportSettings;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub staging: Arc<dyn StagingStore>,
    pub queue: Arc<dyn JobQueue>,
    pub games: Arc<dyn GameStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub processor: Arc<ItemProcessor>,
    pub cleanup: Arc<CleanupCoordinator>,
    pub import: ImportSettings,
}

impl FeatureState {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        queue: Arc<dyn JobQueue>,
        games: Arc<dyn GameStore>,
        importer: Arc<dyn GamesImporter>,
        authorizer: Arc<dyn Authorizer>,
        import: &ImportConfig,
    ) -> Self {
        let cleanup = Arc::new(CleanupCoordinator::new(staging.clone(), queue.clone()));
        let processor = Arc::new(ItemProcessor::new(
            staging.clone(),
            importer,
            cleanup.clone(),
        ));

        Self {
            staging,
            queue,
            games,
            authorizer,
            processor,
            cleanup,
            import: ImportSettings::from(import),
        }
    }

    /// Worker pool that feeds import jobs to this state's processor
    pub fn worker_pool(&self, settings: WorkerSettings) -> WorkerPool {
        WorkerPool::new(self.queue.clone(), settings).register(self.processor.clone())
    }
}

impl FromRef<FeatureState> for Arc<dyn Authorizer> {
    fn from_ref(state: &FeatureState) -> Self {
        state.authorizer.clone()
    }
}

/// All feature routes, mounted under `/api/v1` by the caller
pub fn router(state: FeatureState) -> Router<()> {
    let admin_games = imports::imports_routes(state.import.max_upload_bytes)
        .merge(games::games_routes());

    Router::new()
        .nest("/admin/games", admin_games)
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod testing {
    use super::*;
    use crate::db::MemoryGameStore;
    use crate::ingest::{JsonGamesImporter, MemoryJobQueue};
    use crate::middleware::TokenAuthorizer;
    use crate::storage::MemoryStagingStore;
    use bytes::Bytes;
    use std::io::{Cursor, Write};
    use zip::{write::SimpleFileOptions, ZipWriter};

    pub const ADMIN_TOKEN: &str = "test-admin-token";

    pub struct TestState {
        pub state: FeatureState,
        pub staging: Arc<MemoryStagingStore>,
        pub queue: Arc<MemoryJobQueue>,
        pub games: Arc<MemoryGameStore>,
    }

    pub fn memory_state() -> TestState {
        let staging = Arc::new(MemoryStagingStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let games = Arc::new(MemoryGameStore::new());
        let state = FeatureState::new(
            staging.clone(),
            queue.clone(),
            games.clone(),
            Arc::new(JsonGamesImporter::new(games.clone())),
            Arc::new(TokenAuthorizer::new([ADMIN_TOKEN])),
            &ImportConfig::default(),
        );
        TestState {
            state,
            staging,
            queue,
            games,
        }
    }

    /// Zip with the given `(name, content)` files; names ending in `/` are
    /// added as directories.
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
}
