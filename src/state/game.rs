use std::{fmt, str::FromStr, sync::Weak};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::capture::Clip;

/// One of the two competing teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Team {
    /// First team (left scoreboard card).
    #[serde(rename = "team1")]
    Team1,
    /// Second team (right scoreboard card).
    #[serde(rename = "team2")]
    Team2,
}

impl Team {
    /// Wire name used by the classifier and the persisted history.
    pub fn as_str(self) -> &'static str {
        match self {
            Team::Team1 => "team1",
            Team::Team2 => "team2",
        }
    }

    /// Human readable label used in announcements.
    pub fn label(self) -> &'static str {
        match self {
            Team::Team1 => "Team 1",
            Team::Team2 => "Team 2",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name one of the two teams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown team `{0}`")]
pub struct UnknownTeam(pub String);

impl FromStr for Team {
    type Err = UnknownTeam;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "team1" | "team_1" | "1" => Ok(Team::Team1),
            "team2" | "team_2" | "2" => Ok(Team::Team2),
            _ => Err(UnknownTeam(value.to_string())),
        }
    }
}

/// Points awarded to a team for a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScoreDelta {
    /// Team receiving the points.
    pub team: Team,
    /// Non-negative number of points.
    pub points: u32,
}

/// Lifecycle of the classification attached to a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InferenceState {
    /// No classification was issued (capture failed before a clip existed).
    None,
    /// Classification in flight.
    Pending,
    /// Classification returned a delta that was applied.
    Resolved,
    /// Classification failed or timed out; the round stays unscored.
    Failed,
    /// Classification was superseded before it resolved.
    Cancelled,
}

/// One toss interval of the current game.
#[derive(Debug, Clone)]
pub struct Round {
    /// 1-based index scoped to the current game.
    pub index: u32,
    /// Weak handle on the capture session's clip for this round.
    pub clip: Weak<Clip>,
    pub inference: InferenceState,
    /// Delta applied by the classifier, if any.
    pub delta: Option<ScoreDelta>,
}

impl Round {
    /// Open round with no clip or classification yet.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            clip: Weak::new(),
            inference: InferenceState::None,
            delta: None,
        }
    }
}

/// Whether the active game still accepts rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Rounds and edits are accepted.
    InProgress,
    /// Recorded; replaced by the next game.
    Completed,
}

/// Outcome recorded for a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum Winner {
    #[serde(rename = "team1")]
    Team1,
    #[serde(rename = "team2")]
    Team2,
    /// Equal scores under [`TiePolicy::RecordTie`].
    #[serde(rename = "tie")]
    Tie,
}

impl Winner {
    /// Name spoken by the announcer.
    pub fn label(self) -> &'static str {
        match self {
            Winner::Team1 => "team1",
            Winner::Team2 => "team2",
            Winner::Tie => "nobody, it's a tie",
        }
    }
}

impl From<Team> for Winner {
    fn from(team: Team) -> Self {
        match team {
            Team::Team1 => Winner::Team1,
            Team::Team2 => Winner::Team2,
        }
    }
}

/// How equal final scores are resolved when a game is completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Record a tie: only the total game counter moves.
    #[default]
    RecordTie,
    /// Award equal scores to team2, matching the legacy scoreboard.
    FavorTeam2,
}

impl TiePolicy {
    /// Decide the winner from final scores using strict comparison.
    pub fn decide(self, team1: u32, team2: u32) -> Winner {
        if team1 > team2 {
            Winner::Team1
        } else if team2 > team1 {
            Winner::Team2
        } else {
            match self {
                TiePolicy::RecordTie => Winner::Tie,
                TiePolicy::FavorTeam2 => Winner::Team2,
            }
        }
    }
}

/// Immutable snapshot of a completed game, appended once to the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinishedGameRecord {
    /// Number of the game that was played.
    pub game_id: u64,
    pub winner: Winner,
    pub team1_score: u32,
    pub team2_score: u32,
    pub total_rounds: u32,
}

/// Running state of the game currently being played.
#[derive(Debug, Clone)]
pub struct Game {
    /// 1-based game number, also the finished record's id.
    pub number: u64,
    pub team1_score: u32,
    pub team2_score: u32,
    /// Rounds in play order.
    pub rounds: Vec<Round>,
    pub status: GameStatus,
}

impl Game {
    /// Start a fresh game with the given number.
    pub fn new(number: u64) -> Self {
        Self {
            number,
            team1_score: 0,
            team2_score: 0,
            rounds: Vec::new(),
            status: GameStatus::InProgress,
        }
    }

    fn score_mut(&mut self, team: Team) -> &mut u32 {
        match team {
            Team::Team1 => &mut self.team1_score,
            Team::Team2 => &mut self.team2_score,
        }
    }

    /// Append the next round and return its index.
    pub fn open_round(&mut self) -> u32 {
        let index = self.rounds.len() as u32 + 1;
        self.rounds.push(Round::new(index));
        index
    }

    /// Round by its 1-based index.
    pub fn round_mut(&mut self, index: u32) -> Option<&mut Round> {
        index
            .checked_sub(1)
            .and_then(|slot| self.rounds.get_mut(slot as usize))
    }

    /// Add a classified delta to the named team, saturating at `u32::MAX`.
    pub fn apply_delta(&mut self, delta: ScoreDelta) {
        let score = self.score_mut(delta.team);
        *score = score.saturating_add(delta.points);
    }

    /// Overwrite a team's score; validation happens in the engine.
    pub fn set_score(&mut self, team: Team, value: u32) {
        *self.score_mut(team) = value;
    }

    /// Whether either team has scored.
    pub fn has_points(&self) -> bool {
        self.team1_score > 0 || self.team2_score > 0
    }

    /// Snapshot this game as a finished record.
    pub fn finish(&self, policy: TiePolicy) -> FinishedGameRecord {
        FinishedGameRecord {
            game_id: self.number,
            winner: policy.decide(self.team1_score, self.team2_score),
            team1_score: self.team1_score,
            team2_score: self.team2_score,
            total_rounds: self.rounds.len() as u32,
        }
    }
}
