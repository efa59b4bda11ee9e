use serde::Serialize;
use tracing::warn;

use crate::{
    dao::stats::StatsCounters,
    dto::{
        now_rfc3339,
        sse::{
            DiscardReason, GameCompletedEvent, RoundDiscardedEvent, RoundScoredEvent, ServerEvent,
            StatsUpdatedEvent,
        },
    },
    error::ErrorKind,
    state::{
        Engine,
        game::{FinishedGameRecord, ScoreDelta},
    },
};

pub const EVENT_GAME_SNAPSHOT: &str = "game.snapshot";
const EVENT_ROUND_SCORED: &str = "round.scored";
const EVENT_ROUND_DISCARDED: &str = "round.discarded";
const EVENT_GAME_COMPLETED: &str = "game.completed";
const EVENT_STATS_UPDATED: &str = "stats.updated";

/// Broadcast the full scoreboard view.
pub async fn broadcast_snapshot(engine: &Engine) {
    let snapshot = engine.snapshot().await;
    send_event(engine, EVENT_GAME_SNAPSHOT, &snapshot);
}

/// Broadcast a classified delta that was folded into the score.
pub fn broadcast_round_scored(
    engine: &Engine,
    game: u64,
    round: u32,
    delta: ScoreDelta,
    team1_score: u32,
    team2_score: u32,
) {
    let payload = RoundScoredEvent {
        game,
        round,
        delta,
        team1_score,
        team2_score,
    };
    send_event(engine, EVENT_ROUND_SCORED, &payload);
}

/// Broadcast that a round will never receive points.
pub fn broadcast_round_discarded(
    engine: &Engine,
    game: u64,
    round: u32,
    reason: DiscardReason,
    error: Option<ErrorKind>,
) {
    let payload = RoundDiscardedEvent {
        game,
        round,
        reason,
        error,
    };
    send_event(engine, EVENT_ROUND_DISCARDED, &payload);
}

pub fn broadcast_game_completed(engine: &Engine, record: &FinishedGameRecord, persisted: bool) {
    let payload = GameCompletedEvent {
        record: record.clone(),
        completed_at: now_rfc3339(),
        persisted,
    };
    send_event(engine, EVENT_GAME_COMPLETED, &payload);
}

pub fn broadcast_stats_updated(engine: &Engine, counters: StatsCounters) {
    send_event(engine, EVENT_STATS_UPDATED, &StatsUpdatedEvent(counters));
}

fn send_event(engine: &Engine, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => engine.sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::state::game::Winner;

    #[test]
    fn completed_event_carries_record_and_timestamp() {
        let record = FinishedGameRecord {
            game_id: 2,
            winner: Winner::Team2,
            team1_score: 4,
            team2_score: 9,
            total_rounds: 6,
        };
        let event = ServerEvent::json(
            Some(EVENT_GAME_COMPLETED.to_string()),
            &GameCompletedEvent {
                record,
                completed_at: now_rfc3339(),
                persisted: false,
            },
        )
        .unwrap();

        let data: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data["record"]["winner"], "team2");
        assert_eq!(data["persisted"], false);
        assert!(data["completed_at"].as_str().is_some_and(|t| t.contains('T')));
    }

    #[test]
    fn discarded_event_omits_missing_error() {
        let payload = RoundDiscardedEvent {
            game: 1,
            round: 2,
            reason: DiscardReason::Superseded,
            error: None,
        };
        let data = serde_json::to_value(&payload).unwrap();
        assert_eq!(data["reason"], "superseded");
        assert!(data.get("error").is_none());
    }
}
