//! Durable cross-game statistics layered on top of a [`KeyValueStore`].
//!
//! Counters and history live under the fixed keys the browser scoreboard
//! reads from local storage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::{
    dao::{
        kv_store::KeyValueStore,
        storage::{StorageError, StorageResult},
    },
    state::game::{FinishedGameRecord, Winner},
};

pub const TOTAL_GAMES_KEY: &str = "totalGames";
pub const TEAM1_WINS_KEY: &str = "team1Wins";
pub const TEAM2_WINS_KEY: &str = "team2Wins";
pub const TIES_KEY: &str = "ties";
pub const HISTORY_KEY: &str = "gameHistory";

/// Aggregate win/loss counters; every field only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatsCounters {
    pub total_games: u64,
    pub team1_wins: u64,
    pub team2_wins: u64,
    pub ties: u64,
}

impl StatsCounters {
    fn count(&mut self, winner: Winner) {
        self.total_games += 1;
        match winner {
            Winner::Team1 => self.team1_wins += 1,
            Winner::Team2 => self.team2_wins += 1,
            Winner::Tie => self.ties += 1,
        }
    }

    /// Rebuild every counter from the recorded games.
    fn from_history(history: &[FinishedGameRecord]) -> Self {
        let mut counters = Self::default();
        for record in history {
            counters.count(record.winner);
        }
        counters
    }
}

#[derive(Debug, Default)]
struct Mirror {
    counters: StatsCounters,
    history: Vec<FinishedGameRecord>,
}

/// Stats persistence with an in-memory mirror that always reflects live play.
pub struct StatsStore {
    backend: Arc<dyn KeyValueStore>,
    mirror: RwLock<Mirror>,
    write_gate: Mutex<()>,
}

impl StatsStore {
    /// Read persisted counters and history. Never fails: unreadable entries
    /// fall back to zero or an empty history.
    ///
    /// Counters lagging behind the history are recounted from it.
    pub async fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let mut counters = StatsCounters {
            total_games: read_counter(backend.as_ref(), TOTAL_GAMES_KEY).await,
            team1_wins: read_counter(backend.as_ref(), TEAM1_WINS_KEY).await,
            team2_wins: read_counter(backend.as_ref(), TEAM2_WINS_KEY).await,
            ties: read_counter(backend.as_ref(), TIES_KEY).await,
        };
        let history = read_history(backend.as_ref()).await;

        let recorded = history.len() as u64;
        let decided = counters.team1_wins + counters.team2_wins + counters.ties;
        if recorded > counters.total_games || recorded > decided {
            warn!(
                total_games = counters.total_games,
                history = recorded,
                "game history ahead of counters; recounting"
            );
            counters = StatsCounters::from_history(&history);
        }

        debug!(
            backend = backend.name(),
            total_games = counters.total_games,
            history = history.len(),
            "stats loaded"
        );

        Self {
            backend,
            mirror: RwLock::new(Mirror { counters, history }),
            write_gate: Mutex::new(()),
        }
    }

    /// Name of the backing store, reported by the health check.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Current counters, including games whose write failed.
    pub async fn counters(&self) -> StatsCounters {
        self.mirror.read().await.counters
    }

    /// Number the next game should carry, past every total and recorded id.
    pub async fn next_game_id(&self) -> u64 {
        let mirror = self.mirror.read().await;
        let last_recorded = mirror.history.iter().map(|record| record.game_id).max().unwrap_or(0);
        mirror.counters.total_games.max(last_recorded) + 1
    }

    /// Finished games, oldest first.
    pub async fn history(&self) -> Vec<FinishedGameRecord> {
        self.mirror.read().await.history.clone()
    }

    /// Count `record` and append it to the history.
    ///
    /// The mirror advances before anything is written; a backend failure is
    /// returned to the caller but does not roll the mirror back. History and
    /// counters go out in a single batch.
    pub async fn record_completion(&self, record: FinishedGameRecord) -> StorageResult<StatsCounters> {
        let _gate = self.write_gate.lock().await;

        let (counters, history_json) = {
            let mut mirror = self.mirror.write().await;
            mirror.counters.count(record.winner);
            mirror.history.push(record);
            (mirror.counters, serde_json::to_string(&mirror.history))
        };
        let history_json = history_json.map_err(|err| {
            StorageError::unavailable("failed to encode game history".into(), err)
        })?;

        self.backend
            .put_all(vec![
                (HISTORY_KEY.into(), history_json),
                (TOTAL_GAMES_KEY.into(), counters.total_games.to_string()),
                (TEAM1_WINS_KEY.into(), counters.team1_wins.to_string()),
                (TEAM2_WINS_KEY.into(), counters.team2_wins.to_string()),
                (TIES_KEY.into(), counters.ties.to_string()),
            ])
            .await?;

        Ok(counters)
    }

    /// Ping the backend.
    pub async fn health_check(&self) -> StorageResult<()> {
        self.backend.health_check().await
    }
}

async fn read_counter(backend: &dyn KeyValueStore, key: &str) -> u64 {
    match backend.get(key).await {
        Ok(Some(raw)) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "corrupt counter; defaulting to 0");
            0
        }),
        Ok(None) => 0,
        Err(err) => {
            warn!(key, error = %err, "counter unreadable; defaulting to 0");
            0
        }
    }
}

async fn read_history(backend: &dyn KeyValueStore) -> Vec<FinishedGameRecord> {
    match backend.get(HISTORY_KEY).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(error = %err, "corrupt game history; starting empty");
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!(error = %err, "game history unreadable; starting empty");
            Vec::new()
        }
    }
}
