//! Update game command
//!
//! Partially updates one game, identified by its event's short name and the
//! year. Blank or absent fields are left unchanged.

use crate::db::{Game, GamePatch, GameStore, GameStoreError};
use crate::features::shared::validation::{non_blank, validate_short_name};
use crate::middleware::AdminCapability;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Integer sent either as a JSON number or as a form string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntegerField {
    Number(i64),
    Text(String),
}

impl IntegerField {
    /// `Ok(None)` for a blank string
    fn parse(&self) -> Result<Option<i64>, std::num::ParseIntError> {
        match self {
            IntegerField::Number(n) => Ok(Some(*n)),
            IntegerField::Text(s) => non_blank(Some(s.as_str()))
                .map(|v| v.parse::<i64>())
                .transpose(),
        }
    }
}

/// Command to update an existing game
///
/// ```rust,ignore
/// let command = UpdateGameCommand {
///     short_name: "wucc".to_string(),
///     game_year: IntegerField::Number(2018),
///     results_url: Some("https://example.org/wucc/2018/results".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateGameCommand {
    pub short_name: String,
    pub game_year: IntegerField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eid: Option<IntegerField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standings_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awards_url: Option<String>,
}

impl Default for IntegerField {
    fn default() -> Self {
        IntegerField::Text(String::new())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateGameResponse {
    pub message: String,
    pub game: Game,
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateGameError {
    #[error("{0}")]
    Validation(String),
    #[error("At least one field must be provided for update")]
    NoFieldsToUpdate,
    #[error("Event not found: {0}")]
    EventNotFound(String),
    #[error("No game for year {0}")]
    GameNotFound(i32),
    #[error("Game store error: {0}")]
    Store(GameStoreError),
}

impl From<GameStoreError> for UpdateGameError {
    fn from(err: GameStoreError) -> Self {
        match err {
            GameStoreError::EventNotFound(short_name) => UpdateGameError::EventNotFound(short_name),
            GameStoreError::GameNotFound { year, .. } => UpdateGameError::GameNotFound(year),
            GameStoreError::InvalidPatch(message) => UpdateGameError::Validation(message),
            other => UpdateGameError::Store(other),
        }
    }
}

/// Validated form of [`UpdateGameCommand`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameUpdate {
    pub short_name: String,
    pub year: i32,
    pub patch: GamePatch,
}

impl UpdateGameCommand {
    /// Normalize the command into a store patch
    ///
    /// # Errors
    ///
    /// - `Validation` - a field is malformed
    /// - `NoFieldsToUpdate` - every patch field is blank or absent
    pub fn validate(&self) -> Result<GameUpdate, UpdateGameError> {
        let short_name = validate_short_name(&self.short_name)
            .map_err(|e| UpdateGameError::Validation(e.to_string()))?;

        let year = self
            .game_year
            .parse()
            .ok()
            .flatten()
            .and_then(|y| i32::try_from(y).ok())
            .filter(|y| (1..=9999).contains(y))
            .ok_or_else(|| {
                UpdateGameError::Validation("game_year must be a year between 1 and 9999".into())
            })?;

        let eid = match &self.eid {
            Some(eid) => eid.parse().map_err(|_| {
                UpdateGameError::Validation("eid must be a positive integer".to_string())
            })?,
            None => None,
        };

        let patch = GamePatch {
            eid,
            start_date: parse_date(self.start_date.as_deref(), "start_date")?,
            end_date: parse_date(self.end_date.as_deref(), "end_date")?,
            results_url: non_blank(self.results_url.as_deref()).map(str::to_string),
            standings_url: non_blank(self.standings_url.as_deref()).map(str::to_string),
            awards_url: non_blank(self.awards_url.as_deref()).map(str::to_string),
        };

        if patch.is_empty() {
            return Err(UpdateGameError::NoFieldsToUpdate);
        }
        patch.validate()?;

        Ok(GameUpdate {
            short_name,
            year,
            patch,
        })
    }
}

fn parse_date(value: Option<&str>, field: &str) -> Result<Option<NaiveDate>, UpdateGameError> {
    non_blank(value)
        .map(|v| {
            NaiveDate::parse_from_str(v, DATE_FORMAT).map_err(|_| {
                UpdateGameError::Validation(format!("{} must be a date in YYYY-MM-DD format", field))
            })
        })
        .transpose()
}

#[tracing::instrument(skip(store, _admin))]
pub async fn handle(
    store: &dyn GameStore,
    _admin: &AdminCapability,
    command: UpdateGameCommand,
) -> Result<UpdateGameResponse, UpdateGameError> {
    let update = command.validate()?;

    let game = store
        .apply_patch(&update.short_name, update.year, &update.patch)
        .await?;

    Ok(UpdateGameResponse {
        message: "Game updated.".to_string(),
        game,
    })
}
