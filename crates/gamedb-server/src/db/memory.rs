//! In-memory [`GameStore`] for tests and local development

use super::games::{EventRef, Game, GamePatch, GameStore, GameStoreError, GameUpsert, UpsertOutcome};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MemoryEvent {
    name: String,
    games: BTreeMap<i32, Game>,
}

#[derive(Debug, Default)]
pub struct MemoryGameStore {
    events: Mutex<HashMap<String, MemoryEvent>>,
    unavailable: AtomicBool,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with [`GameStoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn game_count(&self) -> usize {
        self.events
            .lock()
            .await
            .values()
            .map(|event| event.games.len())
            .sum()
    }

    pub async fn event_name(&self, short_name: &str) -> Option<String> {
        self.events
            .lock()
            .await
            .get(short_name)
            .map(|event| event.name.clone())
    }

    fn check_available(&self) -> Result<(), GameStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(GameStoreError::Unavailable("game store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn lookup<'a>(
    events: &'a mut HashMap<String, MemoryEvent>,
    short_name: &str,
    year: i32,
) -> Result<&'a mut Game, GameStoreError> {
    let event = events
        .get_mut(short_name)
        .ok_or_else(|| GameStoreError::EventNotFound(short_name.to_string()))?;
    event
        .games
        .get_mut(&year)
        .ok_or_else(|| GameStoreError::GameNotFound {
            short_name: short_name.to_string(),
            year,
        })
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn find_game(&self, short_name: &str, year: i32) -> Result<Game, GameStoreError> {
        self.check_available()?;
        let mut events = self.events.lock().await;
        lookup(&mut events, short_name, year).map(|game| game.clone())
    }

    async fn apply_patch(
        &self,
        short_name: &str,
        year: i32,
        patch: &GamePatch,
    ) -> Result<Game, GameStoreError> {
        self.check_available()?;
        let mut events = self.events.lock().await;
        let game = lookup(&mut events, short_name, year)?;

        patch.apply(game)?;
        game.updated_at = Utc::now();
        Ok(game.clone())
    }

    async fn upsert_games(
        &self,
        records: &[GameUpsert],
    ) -> Result<Vec<UpsertOutcome>, GameStoreError> {
        self.check_available()?;

        let mut events = self.events.lock().await;
        // applied to a copy so a failing record leaves the store untouched
        let mut next = events.clone();
        let outcomes = records
            .iter()
            .map(|record| upsert_one(&mut next, record))
            .collect::<Result<Vec<_>, _>>()?;
        *events = next;

        Ok(outcomes)
    }
}

fn upsert_one(
    events: &mut HashMap<String, MemoryEvent>,
    record: &GameUpsert,
) -> Result<UpsertOutcome, GameStoreError> {
    let GameUpsert { event, year, patch } = record;
    patch.validate()?;

    let entry = events
        .entry(event.short_name.clone())
        .or_insert_with(|| MemoryEvent {
            name: event.name.clone(),
            games: BTreeMap::new(),
        });

    let (mut game, outcome) = match entry.games.get(year) {
        Some(existing) => (existing.clone(), UpsertOutcome::Updated),
        None => (new_game(event, *year), UpsertOutcome::Inserted),
    };

    patch.apply(&mut game)?;

    entry.name = event.name.clone();
    for existing in entry.games.values_mut() {
        existing.event_name = event.name.clone();
    }
    game.event_name = event.name.clone();
    game.updated_at = Utc::now();
    entry.games.insert(*year, game);

    Ok(outcome)
}

fn new_game(event: &EventRef, year: i32) -> Game {
    Game {
        id: Uuid::new_v4(),
        event_short_name: event.short_name.clone(),
        event_name: event.name.clone(),
        year,
        eid: None,
        start_date: None,
        end_date: None,
        results_url: None,
        standings_url: None,
        awards_url: None,
        updated_at: Utc::now(),
    }
}
