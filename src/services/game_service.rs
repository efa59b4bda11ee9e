//! Business logic behind the game routes. Every mutation goes through the
//! engine; this layer only shapes requests and responses.

use crate::{
    dao::stats::StatsCounters,
    dto::game::{DeviceResponse, GameSnapshot, HistoryOrder, RoundResponse, ScoreEditRequest},
    error::EngineError,
    state::{
        SharedEngine,
        game::{FinishedGameRecord, Team},
    },
};

/// Acquire the camera, or retry after a failure.
pub async fn acquire_device(engine: &SharedEngine) -> Result<DeviceResponse, EngineError> {
    engine.acquire().await
}

/// Start recording a round and return it with the updated game.
pub async fn begin_round(engine: &SharedEngine) -> Result<RoundResponse, EngineError> {
    let round = engine.begin_round().await?;
    Ok(RoundResponse {
        round,
        game: engine.snapshot().await,
    })
}

/// Finish the round in flight. Scoring continues in the background.
pub async fn finish_round(engine: &SharedEngine) -> Result<RoundResponse, EngineError> {
    let round = engine.finish_round().await?;
    Ok(RoundResponse {
        round,
        game: engine.snapshot().await,
    })
}

/// Apply a manual score correction.
pub async fn edit_score(
    engine: &SharedEngine,
    team: Team,
    request: &ScoreEditRequest,
) -> Result<GameSnapshot, EngineError> {
    engine.manual_edit(team, &request.raw_value()).await
}

/// Record the game and start the next one.
pub async fn complete_game(engine: &SharedEngine) -> Result<FinishedGameRecord, EngineError> {
    engine.complete_game().await
}

/// Current cross-game counters.
pub async fn stats(engine: &SharedEngine) -> StatsCounters {
    engine.stats().counters().await
}

/// Finished games, most recent first unless `order` asks otherwise.
pub async fn history(engine: &SharedEngine, order: HistoryOrder) -> Vec<FinishedGameRecord> {
    let mut records = engine.stats().history().await;
    if order == HistoryOrder::Desc {
        records.reverse();
    }
    records
}
