use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    capture::{CaptureStatus, PreviewInfo},
    dto::validation::validate_score_value,
    error::ErrorKind,
    state::{
        game::{GameStatus, InferenceState, Round, ScoreDelta},
        state_machine::RoundPhase,
    },
};

/// Read-only view of the live game handed to the scoreboard.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GameSnapshot {
    /// Number of the game in play.
    pub game_number: u64,
    pub team1_score: u32,
    pub team2_score: u32,
    /// Rounds opened so far.
    pub round_count: u32,
    pub phase: RoundPhase,
    /// Capture device status.
    pub device: CaptureStatus,
    /// Human readable status line ("Ready", "Recording...", ...).
    pub status: String,
    /// Whether the game still accepts rounds.
    pub game_status: GameStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorKind>,
    /// Whether stats writes are currently failing.
    pub degraded: bool,
    pub rounds: Vec<RoundSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewInfo>,
}

/// Per-round line of the snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundSummary {
    /// 1-based round index.
    pub index: u32,
    pub inference: InferenceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ScoreDelta>,
    /// Whether the round's clip is still held by the capture session.
    pub clip_available: bool,
}

impl From<&Round> for RoundSummary {
    fn from(round: &Round) -> Self {
        Self {
            index: round.index,
            inference: round.inference,
            delta: round.delta,
            clip_available: round.clip.strong_count() > 0,
        }
    }
}

/// Manual score correction. `value` accepts a JSON number or a numeric string.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ScoreEditRequest {
    #[validate(custom(function = "validate_score_value"))]
    #[schema(value_type = String, example = "12")]
    /// New score for the team.
    pub value: Value,
}

impl ScoreEditRequest {
    /// Raw textual form of the submitted value.
    pub fn raw_value(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Sort order of the history listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOrder {
    /// Most recent game first, as shown on the history screen.
    #[default]
    Desc,
    /// Oldest game first.
    Asc,
}

/// Query parameters of `GET /history`.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Defaults to most recent first.
    #[serde(default)]
    pub order: Option<HistoryOrder>,
}

/// Returned by the round begin/finish routes.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundResponse {
    /// 1-based index of the round within the current game.
    pub round: u32,
    /// Game view after the transition.
    pub game: GameSnapshot,
}

/// Summary of the device after an acquisition attempt.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceResponse {
    /// Device status after the attempt.
    pub status: CaptureStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PreviewInfo>,
}
