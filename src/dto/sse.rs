use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dao::stats::StatsCounters,
    error::ErrorKind,
    state::game::{FinishedGameRecord, ScoreDelta},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name; unnamed events are plain messages.
    pub event: Option<String>,
    /// JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Event with an optional name and a raw data field.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    pub message: String,
    /// Whether stats writes are currently failing.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a classified delta was folded into the score.
pub struct RoundScoredEvent {
    pub game: u64,
    pub round: u32,
    pub delta: ScoreDelta,
    pub team1_score: u32,
    pub team2_score: u32,
}

/// Why a round ended up without points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// A newer round started before the classifier answered.
    Superseded,
    /// The classifier failed or timed out.
    Unscored,
    /// The game was completed while the round was still open.
    GameCompleted,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a round is left unscored.
pub struct RoundDiscardedEvent {
    pub game: u64,
    pub round: u32,
    pub reason: DiscardReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once a game has been recorded.
pub struct GameCompletedEvent {
    pub record: FinishedGameRecord,
    /// RFC 3339 completion time.
    pub completed_at: String,
    /// Whether the record reached durable storage.
    pub persisted: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
/// Broadcast after the stats counters moved.
pub struct StatsUpdatedEvent(pub StatsCounters);
