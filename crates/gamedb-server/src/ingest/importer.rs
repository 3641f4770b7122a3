//! Parsing staged payloads into games
//!
//! A payload holds one game record or an array of them:
//!
//! ```json
//! {
//!   "event": { "short_name": "wucc", "name": "World Ultimate Club Championships" },
//!   "year": 2018,
//!   "eid": 104,
//!   "start_date": "2018-07-14",
//!   "end_date": "2018-07-21",
//!   "results_url": "https://example.org/wucc/2018/results"
//! }
//! ```

use crate::db::{EventRef, GamePatch, GameStore, GameStoreError, GameUpsert, UpsertOutcome};
use crate::features::shared::validation::{validate_name, validate_short_name, MAX_NAME_LENGTH};
use crate::storage::StagedPayload;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub records: usize,
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Error, Debug)]
pub enum ImportError {
    /// The payload is not a valid record set
    #[error("{0}")]
    Parse(String),

    #[error("Failed to read payload: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] GameStoreError),
}

impl ImportError {
    pub fn is_transient(&self) -> bool {
        match self {
            ImportError::Parse(_) => false,
            ImportError::Read(_) => true,
            ImportError::Store(e) => e.is_transient(),
        }
    }
}

/// Merges one staged payload into the entity store
#[async_trait]
pub trait GamesImporter: Send + Sync {
    async fn import(&self, payload: StagedPayload) -> Result<ImportSummary, ImportError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub short_name: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameRecord {
    pub event: EventRecord,
    pub year: i32,
    #[serde(default)]
    pub eid: Option<i64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub results_url: Option<String>,
    #[serde(default)]
    pub standings_url: Option<String>,
    #[serde(default)]
    pub awards_url: Option<String>,
}

impl GameRecord {
    fn into_upsert(self) -> Result<GameUpsert, ImportError> {
        let short_name = validate_short_name(&self.event.short_name)
            .map_err(|e| ImportError::Parse(e.to_string()))?;
        validate_name(&self.event.name, MAX_NAME_LENGTH)
            .map_err(|e| ImportError::Parse(e.to_string()))?;
        if !(1..=9999).contains(&self.year) {
            return Err(ImportError::Parse(format!("year {} is out of range", self.year)));
        }

        let patch = GamePatch {
            eid: self.eid,
            start_date: self.start_date,
            end_date: self.end_date,
            results_url: self.results_url,
            standings_url: self.standings_url,
            awards_url: self.awards_url,
        };
        patch
            .validate()
            .map_err(|e| ImportError::Parse(format!("{} {}: {}", short_name, self.year, e)))?;

        Ok(GameUpsert {
            event: EventRef {
                short_name,
                name: self.event.name.trim().to_string(),
            },
            year: self.year,
            patch,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecordSet {
    Many(Vec<GameRecord>),
    One(Box<GameRecord>),
}

/// Parse a payload body. Every record is validated before any is returned.
pub fn parse_records(data: &[u8]) -> Result<Vec<GameUpsert>, ImportError> {
    let records = match serde_json::from_slice::<RecordSet>(data) {
        Ok(RecordSet::Many(records)) => records,
        Ok(RecordSet::One(record)) => vec![*record],
        Err(_) => {
            // re-parse strictly to surface a useful message
            return Err(ImportError::Parse(
                match serde_json::from_slice::<GameRecord>(data) {
                    Err(e) => e.to_string(),
                    Ok(_) => "unrecognized record layout".to_string(),
                },
            ));
        },
    };

    records.into_iter().map(GameRecord::into_upsert).collect()
}

pub struct JsonGamesImporter {
    store: Arc<dyn GameStore>,
}

impl JsonGamesImporter {
    pub fn new(store: Arc<dyn GameStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl GamesImporter for JsonGamesImporter {
    async fn import(&self, payload: StagedPayload) -> Result<ImportSummary, ImportError> {
        let handle = payload.handle.clone();
        let data = payload.into_bytes().await?;
        let records = parse_records(&data)?;

        let mut summary = ImportSummary {
            records: records.len(),
            ..Default::default()
        };

        // all records commit together or not at all
        for outcome in self.store.upsert_games(&records).await? {
            match outcome {
                UpsertOutcome::Inserted => summary.inserted += 1,
                UpsertOutcome::Updated => summary.updated += 1,
            }
        }

        debug!(handle = %handle, ?summary, "Payload imported");
        Ok(summary)
    }
}
