//! Events and their yearly games
//!
//! A game is identified by its event's short name plus the year. Edits are
//! expressed as a [`GamePatch`] whose `None` fields leave the stored value
//! untouched; the same patch type carries imported records.

use crate::features::shared::validation::validate_url;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use thiserror::Error;
use uuid::Uuid;

const CHECK_VIOLATION: &str = "23514";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Game {
    pub id: Uuid,
    pub event_short_name: String,
    pub event_name: String,
    pub year: i32,
    pub eid: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub results_url: Option<String>,
    pub standings_url: Option<String>,
    pub awards_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePatch {
    pub eid: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub results_url: Option<String>,
    pub standings_url: Option<String>,
    pub awards_url: Option<String>,
}

impl GamePatch {
    pub fn is_empty(&self) -> bool {
        self == &GamePatch::default()
    }

    /// Field-level checks that do not depend on the stored game
    pub fn validate(&self) -> Result<(), GameStoreError> {
        if let Some(eid) = self.eid {
            if eid <= 0 {
                return Err(GameStoreError::InvalidPatch(
                    "eid must be a positive integer".to_string(),
                ));
            }
        }

        for (url, field) in [
            (&self.results_url, "results"),
            (&self.standings_url, "standings"),
            (&self.awards_url, "awards"),
        ] {
            if let Some(url) = url {
                validate_url(url, field)
                    .map_err(|e| GameStoreError::InvalidPatch(e.to_string()))?;
            }
        }

        check_dates(self.start_date, self.end_date)
    }

    /// Overlay the patch on `game`. `game` is left untouched on error.
    pub fn apply(&self, game: &mut Game) -> Result<(), GameStoreError> {
        self.validate()?;
        check_dates(
            self.start_date.or(game.start_date),
            self.end_date.or(game.end_date),
        )?;

        if let Some(eid) = self.eid {
            game.eid = Some(eid);
        }
        if let Some(date) = self.start_date {
            game.start_date = Some(date);
        }
        if let Some(date) = self.end_date {
            game.end_date = Some(date);
        }
        if let Some(url) = &self.results_url {
            game.results_url = Some(url.clone());
        }
        if let Some(url) = &self.standings_url {
            game.standings_url = Some(url.clone());
        }
        if let Some(url) = &self.awards_url {
            game.awards_url = Some(url.clone());
        }
        Ok(())
    }
}

fn check_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), GameStoreError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(GameStoreError::InvalidPatch(format!(
            "end_date {} is before start_date {}",
            end, start
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    /// Normalized (lowercase) short name
    pub short_name: String,
    pub name: String,
}

/// One imported record: the game identified by `event` and `year`, and the
/// fields to overlay on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameUpsert {
    pub event: EventRef,
    pub year: i32,
    pub patch: GamePatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Error, Debug)]
pub enum GameStoreError {
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("No game for year {year}")]
    GameNotFound { short_name: String, year: i32 },

    #[error("Invalid game data: {0}")]
    InvalidPatch(String),

    #[error("Game store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl GameStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GameStoreError::Unavailable(_) | GameStoreError::Database(_))
    }

    fn from_write(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(CHECK_VIOLATION) => {
                GameStoreError::InvalidPatch(db.message().to_string())
            },
            _ => GameStoreError::Database(err),
        }
    }
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn find_game(&self, short_name: &str, year: i32) -> Result<Game, GameStoreError>;

    /// Apply `patch` to one game atomically and return the stored result.
    async fn apply_patch(
        &self,
        short_name: &str,
        year: i32,
        patch: &GamePatch,
    ) -> Result<Game, GameStoreError>;

    /// Create each event and game if needed, then overlay its patch. The
    /// batch is applied in one transaction: on error nothing is stored.
    async fn upsert_games(
        &self,
        records: &[GameUpsert],
    ) -> Result<Vec<UpsertOutcome>, GameStoreError>;
}

const SELECT_GAME: &str = r#"
    SELECT g.id, e.short_name AS event_short_name, e.name AS event_name, g.year, g.eid,
           g.start_date, g.end_date, g.results_url, g.standings_url, g.awards_url,
           g.updated_at
    FROM games g
    JOIN events e ON e.id = g.event_id
    WHERE e.short_name = $1 AND g.year = $2
"#;

#[derive(Debug, Clone)]
pub struct PgGameStore {
    pool: PgPool,
}

impl PgGameStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GameStore for PgGameStore {
    async fn find_game(&self, short_name: &str, year: i32) -> Result<Game, GameStoreError> {
        let game: Option<Game> = sqlx::query_as(SELECT_GAME)
            .bind(short_name)
            .bind(year)
            .fetch_optional(&self.pool)
            .await?;

        match game {
            Some(game) => Ok(game),
            None => {
                let event_exists: bool =
                    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE short_name = $1)")
                        .bind(short_name)
                        .fetch_one(&self.pool)
                        .await?;
                Err(missing(short_name, year, event_exists))
            },
        }
    }

    async fn apply_patch(
        &self,
        short_name: &str,
        year: i32,
        patch: &GamePatch,
    ) -> Result<Game, GameStoreError> {
        let mut tx = self.pool.begin().await?;

        let locked = format!("{} FOR UPDATE OF g", SELECT_GAME);
        let game: Option<Game> = sqlx::query_as(&locked)
            .bind(short_name)
            .bind(year)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(mut game) = game else {
            let event_exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE short_name = $1)")
                    .bind(short_name)
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(missing(short_name, year, event_exists));
        };

        patch.apply(&mut game)?;

        game.updated_at = sqlx::query_scalar(
            r#"
            UPDATE games
            SET eid = $2,
                start_date = $3,
                end_date = $4,
                results_url = $5,
                standings_url = $6,
                awards_url = $7,
                updated_at = NOW()
            WHERE id = $1
            RETURNING updated_at
            "#,
        )
        .bind(game.id)
        .bind(game.eid)
        .bind(game.start_date)
        .bind(game.end_date)
        .bind(&game.results_url)
        .bind(&game.standings_url)
        .bind(&game.awards_url)
        .fetch_one(&mut *tx)
        .await
        .map_err(GameStoreError::from_write)?;

        tx.commit().await?;

        tracing::info!(game_id = %game.id, short_name, year, "Game updated");
        Ok(game)
    }

    async fn upsert_games(
        &self,
        records: &[GameUpsert],
    ) -> Result<Vec<UpsertOutcome>, GameStoreError> {
        for record in records {
            record.patch.validate()?;
        }

        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(upsert_one(&mut *tx, record).await?);
        }
        tx.commit().await?;

        Ok(outcomes)
    }
}

async fn upsert_one<'e>(
    executor: impl PgExecutor<'e>,
    record: &GameUpsert,
) -> Result<UpsertOutcome, GameStoreError> {
    let GameUpsert { event, year, patch } = record;

    let inserted: bool = sqlx::query_scalar(
        r#"
        WITH event AS (
            INSERT INTO events (short_name, name)
            VALUES ($1, $2)
            ON CONFLICT (short_name) DO UPDATE
            SET name = EXCLUDED.name, updated_at = NOW()
            RETURNING id
        )
        INSERT INTO games (
            event_id, year, eid, start_date, end_date,
            results_url, standings_url, awards_url
        )
        SELECT id, $3::INT, $4::BIGINT, $5::DATE, $6::DATE, $7::TEXT, $8::TEXT, $9::TEXT
        FROM event
        ON CONFLICT (event_id, year) DO UPDATE
        SET eid = COALESCE(EXCLUDED.eid, games.eid),
            start_date = COALESCE(EXCLUDED.start_date, games.start_date),
            end_date = COALESCE(EXCLUDED.end_date, games.end_date),
            results_url = COALESCE(EXCLUDED.results_url, games.results_url),
            standings_url = COALESCE(EXCLUDED.standings_url, games.standings_url),
            awards_url = COALESCE(EXCLUDED.awards_url, games.awards_url),
            updated_at = NOW()
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(&event.short_name)
    .bind(&event.name)
    .bind(*year)
    .bind(patch.eid)
    .bind(patch.start_date)
    .bind(patch.end_date)
    .bind(&patch.results_url)
    .bind(&patch.standings_url)
    .bind(&patch.awards_url)
    .fetch_one(executor)
    .await
    .map_err(GameStoreError::from_write)?;

    Ok(if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    })
}

fn missing(short_name: &str, year: i32, event_exists: bool) -> GameStoreError {
    if event_exists {
        GameStoreError::GameNotFound {
            short_name: short_name.to_string(),
            year,
        }
    } else {
        GameStoreError::EventNotFound(short_name.to_string())
    }
}
