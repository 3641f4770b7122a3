//! Process one staged payload synchronously
//!
//! Used by external schedulers that deliver `import-game` jobs over HTTP
//! instead of through the built-in worker pool.

use crate::features::FeatureState;
use crate::ingest::{IngestError, IngestResult};
use crate::middleware::AdminCapability;
use gamedb_common::PayloadHandle;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessImportCommand {
    pub handle: String,
}

impl ProcessImportCommand {
    pub fn validate(&self) -> Result<PayloadHandle, IngestError> {
        self.handle
            .trim()
            .parse()
            .map_err(|e: gamedb_common::GamedbError| IngestError::Validation(e.to_string()))
    }
}

/// A terminal failure of the item is `Ok` with a failed [`IngestResult`];
/// `Err` is returned for bad input and for transient failures.
#[tracing::instrument(skip(state, _admin), fields(handle = %command.handle))]
pub async fn handle(
    state: &FeatureState,
    _admin: &AdminCapability,
    command: ProcessImportCommand,
) -> Result<IngestResult, IngestError> {
    let handle = command.validate()?;
    state.processor.process(&handle, false).await
}
