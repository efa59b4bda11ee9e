use std::{fmt, time::Instant};

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Phases a round moves through while the game is being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Waiting for the next round to begin.
    Idle,
    /// The camera is recording the current round.
    RoundInFlight,
    /// The round clip was handed to the classifier.
    ScoringPending,
    /// Classification failed; the round stays unscored.
    ScoringSkipped,
    /// The classified delta was folded into the score.
    RoundSettled,
    /// The game was recorded; a new one starts on the next transition.
    GameComplete,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundPhase::Idle => "idle",
            RoundPhase::RoundInFlight => "round_in_flight",
            RoundPhase::ScoringPending => "scoring_pending",
            RoundPhase::ScoringSkipped => "scoring_skipped",
            RoundPhase::RoundSettled => "round_settled",
            RoundPhase::GameComplete => "game_complete",
        };
        f.write_str(name)
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// Start recording a round. Supersedes a round still being scored.
    BeginRound,
    /// Stop recording and hand the clip to the classifier.
    FinishRound,
    /// The classifier answered for the pending round.
    InferenceResolved,
    /// The classifier failed or timed out for the pending round.
    InferenceSkipped,
    /// Leave a settled or skipped round and wait for the next one.
    Settle,
    /// Capture or classification broke mid-round.
    Fault,
    /// Record the current game.
    CompleteGame,
    /// Start a fresh game after completion.
    NewGame,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: RoundPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoundEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: RoundPhase,
        /// Current phase.
        actual: RoundPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A validated transition waiting for its side effects to finish.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: PlanId,
    pub from: RoundPhase,
    pub to: RoundPhase,
    pub event: RoundEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: RoundPhase,
    /// Increments on each applied transition.
    pub version: usize,
    /// Target phase of a planned but not yet applied transition.
    pub pending: Option<RoundPhase>,
}

/// Round/game lifecycle with two-step (plan then apply) transitions.
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    phase: RoundPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for RoundStateMachine {
    fn default() -> Self {
        Self {
            phase: RoundPhase::Idle,
            version: 0,
            pending: None,
        }
    }
}

impl RoundStateMachine {
    /// Create a new state machine initialised in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase currently in effect.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Phase, version and pending target in one copy.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Validate `event` against the current phase and reserve the transition.
    pub fn plan(&mut self, event: RoundEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition and return the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<RoundPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Drop a planned transition, leaving the phase untouched.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Plan and apply in one step for transitions without side effects.
    pub fn advance(&mut self, event: RoundEvent) -> Result<RoundPhase, PlanError> {
        let plan = self.plan(event)?;
        // Planned against the current phase and version; apply cannot mismatch.
        Ok(self.apply(plan.id).unwrap_or(plan.to))
    }

    fn compute_transition(&self, event: RoundEvent) -> Result<RoundPhase, InvalidTransition> {
        use RoundEvent as E;
        use RoundPhase as P;

        let next = match (self.phase, event) {
            (P::Idle | P::ScoringPending, E::BeginRound) => P::RoundInFlight,
            (P::RoundInFlight, E::FinishRound) => P::ScoringPending,
            (P::ScoringPending, E::InferenceResolved) => P::RoundSettled,
            (P::ScoringPending, E::InferenceSkipped) => P::ScoringSkipped,
            (P::RoundSettled | P::ScoringSkipped, E::Settle) => P::Idle,
            (P::RoundInFlight | P::ScoringPending, E::Fault) => P::Idle,
            (from, E::CompleteGame) if from != P::GameComplete => P::GameComplete,
            (P::GameComplete, E::NewGame) => P::Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut RoundStateMachine, event: RoundEvent) -> RoundPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_idle() {
        let sm = RoundStateMachine::new();
        assert_eq!(sm.phase(), RoundPhase::Idle);
        assert_eq!(sm.snapshot().version, 0);
    }

    #[test]
    fn scored_round_returns_to_idle() {
        let mut sm = RoundStateMachine::new();
        assert_eq!(apply(&mut sm, RoundEvent::BeginRound), RoundPhase::RoundInFlight);
        assert_eq!(apply(&mut sm, RoundEvent::FinishRound), RoundPhase::ScoringPending);
        assert_eq!(
            apply(&mut sm, RoundEvent::InferenceResolved),
            RoundPhase::RoundSettled
        );
        assert_eq!(apply(&mut sm, RoundEvent::Settle), RoundPhase::Idle);
        assert_eq!(sm.snapshot().version, 4);
    }

    #[test]
    fn skipped_round_returns_to_idle() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, RoundEvent::BeginRound);
        apply(&mut sm, RoundEvent::FinishRound);
        assert_eq!(
            apply(&mut sm, RoundEvent::InferenceSkipped),
            RoundPhase::ScoringSkipped
        );
        assert_eq!(apply(&mut sm, RoundEvent::Settle), RoundPhase::Idle);
    }

    #[test]
    fn next_round_may_begin_while_scoring() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, RoundEvent::BeginRound);
        apply(&mut sm, RoundEvent::FinishRound);
        assert_eq!(apply(&mut sm, RoundEvent::BeginRound), RoundPhase::RoundInFlight);
    }

    #[test]
    fn begin_round_twice_is_rejected() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, RoundEvent::BeginRound);
        let err = sm.plan(RoundEvent::BeginRound).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(InvalidTransition {
                from: RoundPhase::RoundInFlight,
                event: RoundEvent::BeginRound,
            })
        );
    }

    #[test]
    fn finish_requires_a_round_in_flight() {
        let mut sm = RoundStateMachine::new();
        assert!(matches!(
            sm.plan(RoundEvent::FinishRound),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn faults_demote_to_idle() {
        let mut sm = RoundStateMachine::new();
        apply(&mut sm, RoundEvent::BeginRound);
        assert_eq!(apply(&mut sm, RoundEvent::Fault), RoundPhase::Idle);
        assert!(sm.plan(RoundEvent::Fault).is_err());
    }

    #[test]
    fn complete_game_is_allowed_from_any_playing_phase() {
        for setup in [
            &[][..],
            &[RoundEvent::BeginRound],
            &[RoundEvent::BeginRound, RoundEvent::FinishRound],
        ] {
            let mut sm = RoundStateMachine::new();
            for event in setup {
                apply(&mut sm, *event);
            }
            assert_eq!(apply(&mut sm, RoundEvent::CompleteGame), RoundPhase::GameComplete);
            assert!(sm.plan(RoundEvent::CompleteGame).is_err());
            assert_eq!(apply(&mut sm, RoundEvent::NewGame), RoundPhase::Idle);
        }
    }

    #[test]
    fn pending_plan_blocks_new_plans() {
        let mut sm = RoundStateMachine::new();
        let plan = sm.plan(RoundEvent::BeginRound).unwrap();
        assert_eq!(sm.snapshot().pending, Some(RoundPhase::RoundInFlight));
        assert_eq!(
            sm.plan(RoundEvent::CompleteGame).unwrap_err(),
            PlanError::AlreadyPending
        );
        sm.abort(plan.id).unwrap();
        assert_eq!(sm.phase(), RoundPhase::Idle);
        assert!(sm.snapshot().pending.is_none());
    }

    #[test]
    fn apply_rejects_foreign_plan_id() {
        let mut sm = RoundStateMachine::new();
        let plan = sm.plan(RoundEvent::BeginRound).unwrap();
        let other = Uuid::new_v4();
        assert_eq!(
            sm.apply(other),
            Err(ApplyError::IdMismatch {
                expected: plan.id,
                got: other
            })
        );
        assert_eq!(sm.abort(other), Err(AbortError::IdMismatch { expected: plan.id, got: other }));
        assert_eq!(sm.apply(plan.id), Ok(RoundPhase::RoundInFlight));
        assert_eq!(sm.apply(plan.id), Err(ApplyError::NoPending));
    }
}
