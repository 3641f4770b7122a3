//! Job definitions for the import pipeline

use gamedb_common::PayloadHandle;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation name of the per-payload import job
pub const IMPORT_GAME_OPERATION: &str = "import-game";

/// Parameters of an `import-game` job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportGameParams {
    pub handle: PayloadHandle,
    /// Entry name inside the uploaded archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_name: Option<String>,
    /// Groups the jobs created by one upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
}

impl ImportGameParams {
    pub fn new(handle: PayloadHandle) -> Self {
        Self {
            handle,
            entry_name: None,
            batch_id: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_params_accept_bare_handle() {
        let params: ImportGameParams =
            serde_json::from_value(serde_json::json!({ "handle": "abc123" })).unwrap();
        assert_eq!(params, ImportGameParams::new("abc123".parse().unwrap()));
    }

    #[test]
    fn test_params_reject_invalid_handle() {
        let result: Result<ImportGameParams, _> =
            serde_json::from_value(serde_json::json!({ "handle": "../../etc" }));
        assert!(result.is_err());
    }
}
