pub mod game;
mod sse;
pub mod state_machine;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{Mutex, MutexGuard, RwLock, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    capture::{CaptureSession, CaptureStatus, PreviewInfo},
    dao::stats::StatsStore,
    dto::{
        game::{DeviceResponse, GameSnapshot, RoundSummary},
        sse::DiscardReason,
        validation::parse_score,
    },
    error::{EngineError, ErrorKind},
    inference::{ClassifierError, InferenceOutcome, ScoreInferenceClient},
    services::{
        announcer::{Announcement, Announcer, spawn_announcement},
        sse_events,
    },
    state::{
        game::{FinishedGameRecord, Game, GameStatus, InferenceState, ScoreDelta, Team, TiePolicy, Winner},
        state_machine::{RoundEvent, RoundPhase, RoundStateMachine},
    },
};

pub use self::sse::SseHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError};

/// Engine handle shared by routes and background tasks.
pub type SharedEngine = Arc<Engine>;
/// Bound on device work while a transition is planned.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
const SSE_CAPACITY: usize = 64;

/// Game rules and limits applied by the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How equal final scores are recorded.
    pub tie_policy: TiePolicy,
    /// Largest value accepted by a manual score edit.
    pub max_score: u32,
    /// Bound on device work during a transition; `None` waits forever.
    pub transition_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tie_policy: TiePolicy::default(),
            max_score: 999,
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        }
    }
}

/// Classification currently allowed to touch the score.
struct PendingRound {
    game: u64,
    round: u32,
    token: CancellationToken,
}

/// Outcome of the last settled step, rendered into the status line while idle.
#[derive(Debug, Clone)]
enum StatusNote {
    RoundScored { round: u32, delta: ScoreDelta },
    RoundUnscored { round: u32, kind: ErrorKind },
    GameComplete { game: u64, winner: Winner },
}

impl StatusNote {
    fn render(&self) -> String {
        match self {
            StatusNote::RoundScored { round, delta } => {
                format!("Round {round}: {} +{}", delta.team, delta.points)
            }
            StatusNote::RoundUnscored { round, kind } => {
                format!("Round {round} unscored ({})", kind.as_str())
            }
            StatusNote::GameComplete { game, winner } => match winner {
                Winner::Tie => format!("Game {game} complete: tie"),
                winner => format!("Game {game} complete: {} wins", winner.label()),
            },
        }
    }
}

/// Round/game lifecycle engine.
///
/// Owns the capture session, the classifier front-end, the live game and the
/// stats store. User transitions are serialised through `transition_gate`
/// and go through plan → work → apply/abort on the phase machine. Scores are
/// only written by the engine.
pub struct Engine {
    capture: Mutex<CaptureSession>,
    device_status: RwLock<CaptureStatus>,
    preview: RwLock<Option<PreviewInfo>>,
    inference: ScoreInferenceClient,
    machine: RwLock<RoundStateMachine>,
    game: RwLock<Game>,
    pending: Mutex<Option<PendingRound>>,
    stats: StatsStore,
    sse: SseHub,
    announcer: Arc<dyn Announcer>,
    settings: EngineSettings,
    last_error: RwLock<Option<ErrorKind>>,
    note: RwLock<Option<StatusNote>>,
    degraded: watch::Sender<bool>,
    transition_gate: Mutex<()>,
}

impl Engine {
    /// Build the engine. Game numbers continue past every persisted game.
    pub async fn new(
        capture: CaptureSession,
        inference: ScoreInferenceClient,
        stats: StatsStore,
        announcer: Arc<dyn Announcer>,
        settings: EngineSettings,
    ) -> SharedEngine {
        let first_game = stats.next_game_id().await;
        let device_status = capture.status();
        let (degraded_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            capture: Mutex::new(capture),
            device_status: RwLock::new(device_status),
            preview: RwLock::new(None),
            inference,
            machine: RwLock::new(RoundStateMachine::new()),
            game: RwLock::new(Game::new(first_game)),
            pending: Mutex::new(None),
            stats,
            sse: SseHub::new(SSE_CAPACITY),
            announcer,
            settings,
            last_error: RwLock::new(None),
            note: RwLock::new(None),
            degraded: degraded_tx,
            transition_gate: Mutex::new(()),
        })
    }

    /// Broadcast hub feeding the SSE endpoint.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Cross-game statistics.
    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    /// Whether the last stats write failed.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Acquire the capture device, retrying after an earlier failure.
    pub async fn acquire(&self) -> Result<DeviceResponse, EngineError> {
        let _gate = self.transition_gate.lock().await;
        let result = {
            let mut capture = self.capture.lock().await;
            let result = capture.acquire().await;
            self.sync_device(capture.status(), capture.preview()).await;
            result
        };

        match result {
            Ok(()) => {
                self.clear_device_error().await;
                sse_events::broadcast_snapshot(self).await;
                Ok(DeviceResponse {
                    status: *self.device_status.read().await,
                    preview: self.preview.read().await.clone(),
                })
            }
            Err(err) => {
                let err = EngineError::from(err);
                self.record_error(&err).await;
                sse_events::broadcast_snapshot(self).await;
                Err(err)
            }
        }
    }

    /// Start recording the next round.
    ///
    /// Allowed while the previous round is still being scored: its
    /// classification is cancelled and its result will never be applied.
    pub async fn begin_round(&self) -> Result<u32, EngineError> {
        let gate = self.transition_gate.lock().await;
        let result = self
            .run_planned(&gate, RoundEvent::BeginRound, move || async move {
                let mut capture = self.capture.lock().await;
                let started = async {
                    if matches!(
                        capture.status(),
                        CaptureStatus::Uninitialized | CaptureStatus::Error
                    ) {
                        capture.acquire().await?;
                    }
                    capture.start_round()
                }
                .await;
                self.sync_device(capture.status(), capture.preview()).await;
                started?;
                drop(capture);

                self.supersede_pending(DiscardReason::Superseded).await;
                Ok::<_, EngineError>(self.game.write().await.open_round())
            })
            .await;
        drop(gate);

        match result {
            Ok((round, _)) => {
                *self.note.write().await = None;
                *self.last_error.write().await = None;
                let game_number = self.game.read().await.number;
                info!(game = game_number, round, "round started");
                sse_events::broadcast_snapshot(self).await;
                Ok(round)
            }
            Err(err) => {
                self.record_error(&err).await;
                sse_events::broadcast_snapshot(self).await;
                Err(err)
            }
        }
    }

    /// Stop recording and send the round's clip to the classifier.
    ///
    /// Returns once the clip is finalized; the score is applied later by a
    /// background task, and only if the round is still the pending one.
    pub async fn finish_round(self: &Arc<Self>) -> Result<u32, EngineError> {
        let gate = self.transition_gate.lock().await;
        let result = self
            .run_planned(&gate, RoundEvent::FinishRound, move || async move {
                let mut capture = self.capture.lock().await;
                let clip = capture.end_round().await;
                self.sync_device(capture.status(), capture.preview()).await;
                Ok::<_, EngineError>(clip?)
            })
            .await;

        let clip = match result {
            Ok((clip, _)) => clip,
            Err(err) => {
                let demoted = self.demote_after_fault(&gate).await;
                drop(gate);
                if demoted {
                    self.record_error(&err).await;
                }
                sse_events::broadcast_snapshot(self).await;
                return Err(err);
            }
        };

        let (game_number, round) = {
            let mut game = self.game.write().await;
            let round = game.rounds.len() as u32;
            if let Some(entry) = game.round_mut(round) {
                entry.clip = Arc::downgrade(&clip);
                entry.inference = InferenceState::Pending;
            }
            (game.number, round)
        };

        self.supersede_pending(DiscardReason::Superseded).await;
        let request = self.inference.classify(clip).await;
        let token = request.token();
        *self.pending.lock().await = Some(PendingRound {
            game: game_number,
            round,
            token: token.clone(),
        });
        drop(gate);

        debug!(
            game = game_number,
            round,
            classifier = self.inference.classifier_name(),
            "round submitted for scoring"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = request.outcome().await;
            engine
                .settle_inference(game_number, round, &token, outcome)
                .await;
        });

        sse_events::broadcast_snapshot(self).await;
        Ok(round)
    }

    /// Overwrite a team's score. Accepts a non-negative integer, possibly as text.
    pub async fn manual_edit(&self, team: Team, raw: &str) -> Result<GameSnapshot, EngineError> {
        let value = parse_score(raw).ok_or_else(|| {
            EngineError::InvalidInput(format!("`{}` is not a non-negative integer", raw.trim()))
        })?;
        if value > self.settings.max_score {
            return Err(EngineError::InvalidInput(format!(
                "{value} exceeds the maximum score of {}",
                self.settings.max_score
            )));
        }

        {
            let mut game = self.game.write().await;
            game.set_score(team, value);
            info!(game = game.number, %team, value, "score edited manually");
        }

        sse_events::broadcast_snapshot(self).await;
        Ok(self.snapshot().await)
    }

    /// Record the current game and start a fresh one.
    ///
    /// Rejected with `NothingToRecord` while both scores are zero. A stats
    /// write failure is logged and flips the engine into degraded mode; the
    /// game is still considered complete.
    pub async fn complete_game(&self) -> Result<FinishedGameRecord, EngineError> {
        let gate = self.transition_gate.lock().await;
        let ((record, abandoned), _) = self
            .run_planned(&gate, RoundEvent::CompleteGame, move || async move {
                let record = {
                    let game = self.game.read().await;
                    if !game.has_points() {
                        return Err(EngineError::NothingToRecord);
                    }
                    game.finish(self.settings.tie_policy)
                };

                let mut capture = self.capture.lock().await;
                let abandoned = capture.status() == CaptureStatus::Recording;
                if abandoned {
                    capture.abandon_recording();
                }
                self.sync_device(capture.status(), capture.preview()).await;
                Ok((record, abandoned))
            })
            .await?;

        self.supersede_pending(DiscardReason::GameCompleted).await;
        if abandoned {
            sse_events::broadcast_round_discarded(
                self,
                record.game_id,
                record.total_rounds,
                DiscardReason::GameCompleted,
                None,
            );
        }
        self.game.write().await.status = GameStatus::Completed;

        let persisted = match self.stats.record_completion(record.clone()).await {
            Ok(_) => {
                self.set_degraded(false);
                true
            }
            Err(err) => {
                warn!(game = record.game_id, error = %err, "failed to persist finished game");
                self.set_degraded(true);
                self.record_error(&EngineError::from(err)).await;
                false
            }
        };

        spawn_announcement(Arc::clone(&self.announcer), Announcement::from(&record));

        *self.game.write().await = Game::new(record.game_id + 1);
        *self.note.write().await = Some(StatusNote::GameComplete {
            game: record.game_id,
            winner: record.winner,
        });
        if let Err(err) = self.machine.write().await.advance(RoundEvent::NewGame) {
            warn!(error = ?err, "failed to reset phase after game completion");
        }
        drop(gate);

        info!(
            game = record.game_id,
            winner = ?record.winner,
            team1 = record.team1_score,
            team2 = record.team2_score,
            rounds = record.total_rounds,
            "game completed"
        );

        sse_events::broadcast_game_completed(self, &record, persisted);
        sse_events::broadcast_stats_updated(self, self.stats.counters().await);
        sse_events::broadcast_snapshot(self).await;
        Ok(record)
    }

    /// Read-only view of the live game.
    pub async fn snapshot(&self) -> GameSnapshot {
        let phase = self.machine.read().await.phase();
        let device = *self.device_status.read().await;
        let last_error = *self.last_error.read().await;
        let note = self.note.read().await.clone();
        let preview = self.preview.read().await.clone();
        let game = self.game.read().await;

        let status = if device == CaptureStatus::Error || last_error.is_some_and(ErrorKind::is_device) {
            "Camera Error".to_string()
        } else {
            match phase {
                RoundPhase::RoundInFlight => "Recording...".to_string(),
                RoundPhase::ScoringPending => {
                    let round = game
                        .rounds
                        .iter()
                        .rev()
                        .find(|round| round.inference == InferenceState::Pending)
                        .map_or(game.rounds.len() as u32, |round| round.index);
                    format!("Scoring round {round}...")
                }
                _ => note.map_or_else(|| "Ready".to_string(), |note| note.render()),
            }
        };

        GameSnapshot {
            game_number: game.number,
            team1_score: game.team1_score,
            team2_score: game.team2_score,
            round_count: game.rounds.len() as u32,
            phase,
            device,
            status,
            game_status: game.status,
            last_error,
            degraded: self.is_degraded(),
            rounds: game.rounds.iter().map(RoundSummary::from).collect(),
            preview,
        }
    }

    /// Cancel outstanding work and release the capture device.
    pub async fn shutdown(&self) {
        let _gate = self.transition_gate.lock().await;
        if let Some(pending) = self.pending.lock().await.take() {
            pending.token.cancel();
        }
        self.inference.cancel_outstanding().await;

        let mut capture = self.capture.lock().await;
        capture.release();
        self.sync_device(capture.status(), capture.preview()).await;
        info!("engine shut down");
    }

    /// Fold a classification outcome into the game if it is still current.
    ///
    /// The result is dropped unless its token is live and it belongs to the
    /// round currently awaiting a score. Returns whether it was applied.
    async fn settle_inference(
        &self,
        game_number: u64,
        round: u32,
        token: &CancellationToken,
        outcome: InferenceOutcome,
    ) -> bool {
        let _gate = self.transition_gate.lock().await;
        {
            let mut pending = self.pending.lock().await;
            let current = pending
                .as_ref()
                .is_some_and(|p| p.game == game_number && p.round == round);
            if token.is_cancelled() || !current {
                debug!(game = game_number, round, "dropping stale classification result");
                return false;
            }
            pending.take();
        }

        let mut game = self.game.write().await;
        let mut machine = self.machine.write().await;

        let result = match outcome {
            InferenceOutcome::Scored(delta) => Ok(delta),
            InferenceOutcome::Skipped(err) => Err(err),
            InferenceOutcome::Cancelled => Err(ClassifierError::Cancelled),
        };

        match result {
            Ok(delta) => {
                game.apply_delta(delta);
                if let Some(entry) = game.round_mut(round) {
                    entry.inference = InferenceState::Resolved;
                    entry.delta = Some(delta);
                }
                for event in [RoundEvent::InferenceResolved, RoundEvent::Settle] {
                    if let Err(err) = machine.advance(event) {
                        warn!(round, error = ?err, "unexpected phase while settling round");
                    }
                }
                let (team1, team2) = (game.team1_score, game.team2_score);
                drop(machine);
                drop(game);

                info!(game = game_number, round, team = %delta.team, points = delta.points, "round scored");
                *self.note.write().await = Some(StatusNote::RoundScored { round, delta });
                sse_events::broadcast_round_scored(self, game_number, round, delta, team1, team2);
            }
            Err(err) => {
                let kind = match err {
                    ClassifierError::Timeout(_) => ErrorKind::ClassifierTimeout,
                    _ => ErrorKind::ClassifierUnavailable,
                };
                if let Some(entry) = game.round_mut(round) {
                    entry.inference = InferenceState::Failed;
                }
                for event in [RoundEvent::InferenceSkipped, RoundEvent::Settle] {
                    if let Err(err) = machine.advance(event) {
                        warn!(round, error = ?err, "unexpected phase while skipping round");
                    }
                }
                drop(machine);
                drop(game);

                *self.last_error.write().await = Some(kind);
                *self.note.write().await = Some(StatusNote::RoundUnscored { round, kind });
                sse_events::broadcast_round_discarded(
                    self,
                    game_number,
                    round,
                    DiscardReason::Unscored,
                    Some(kind),
                );
            }
        }

        sse_events::broadcast_snapshot(self).await;
        true
    }

    /// Cancel the pending classification, if any, and mark its round.
    async fn supersede_pending(&self, reason: DiscardReason) -> Option<u32> {
        let pending = self.pending.lock().await.take()?;
        pending.token.cancel();
        self.inference.cancel_outstanding().await;

        {
            let mut game = self.game.write().await;
            if game.number == pending.game {
                if let Some(entry) = game.round_mut(pending.round) {
                    entry.inference = InferenceState::Cancelled;
                }
            }
        }

        debug!(game = pending.game, round = pending.round, ?reason, "pending classification cancelled");
        sse_events::broadcast_round_discarded(self, pending.game, pending.round, reason, None);
        Some(pending.round)
    }

    /// Bring a round broken mid-flight back to `Idle` and free the camera.
    /// Returns false when nothing was in flight (the transition was refused).
    async fn demote_after_fault(&self, _gate: &MutexGuard<'_, ()>) -> bool {
        let mut machine = self.machine.write().await;
        if machine.phase() != RoundPhase::RoundInFlight {
            return false;
        }

        {
            let mut capture = self.capture.lock().await;
            capture.abandon_recording();
            self.sync_device(capture.status(), capture.preview()).await;
        }
        if let Err(err) = machine.advance(RoundEvent::Fault) {
            warn!(error = ?err, "failed to demote phase after fault");
        }
        true
    }

    async fn sync_device(&self, status: CaptureStatus, preview: Option<PreviewInfo>) {
        *self.device_status.write().await = status;
        *self.preview.write().await = preview;
    }

    /// Remember failures worth surfacing in the status line.
    async fn record_error(&self, err: &EngineError) {
        match err.kind() {
            ErrorKind::InvalidState | ErrorKind::InvalidInput | ErrorKind::NothingToRecord => {}
            kind => *self.last_error.write().await = Some(kind),
        }
    }

    async fn clear_device_error(&self) {
        let mut last_error = self.last_error.write().await;
        if last_error.is_some_and(ErrorKind::is_device) {
            *last_error = None;
        }
    }

    fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Plan `event`, run `work` within the transition timeout, then apply
    /// the plan on success or abort it on failure. Callers hold the gate.
    async fn run_planned<F, Fut, T>(
        &self,
        _gate: &MutexGuard<'_, ()>,
        event: RoundEvent,
        work: F,
    ) -> Result<(T, RoundPhase), EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let Plan { id: plan_id, .. } = self.machine.write().await.plan(event)?;

        let work_future = work();
        let outcome = if let Some(limit) = self.settings.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout),
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.machine.write().await.apply(plan_id)?;
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.machine.write().await.abort(plan_id) {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tokio::sync::broadcast;

    use super::*;
    use crate::{
        capture::{CaptureConstraints, session::tests::ScriptedDevice},
        dao::kv_store::MemoryKvStore,
        dto::sse::ServerEvent,
        inference::{InferencePolicy, tests::ScriptedClassifier},
        services::announcer::LogAnnouncer,
    };

    struct Harness {
        engine: SharedEngine,
        classifier: Arc<ScriptedClassifier>,
        store: MemoryKvStore,
        releases: Arc<std::sync::atomic::AtomicUsize>,
        events: broadcast::Receiver<ServerEvent>,
    }

    async fn harness_with(device: ScriptedDevice, policy: InferencePolicy, store: MemoryKvStore) -> Harness {
        let releases = Arc::clone(&device.releases);
        let classifier = Arc::new(ScriptedClassifier::default());
        let stats = StatsStore::load(Arc::new(store.clone())).await;
        let engine = Engine::new(
            CaptureSession::new(Arc::new(device), CaptureConstraints::default()),
            ScoreInferenceClient::new(classifier.clone(), policy),
            stats,
            Arc::new(LogAnnouncer),
            EngineSettings::default(),
        )
        .await;
        let events = engine.sse().subscribe();
        Harness {
            engine,
            classifier,
            store,
            releases,
            events,
        }
    }

    async fn harness() -> Harness {
        let h = harness_with(
            ScriptedDevice::default(),
            InferencePolicy::default(),
            MemoryKvStore::new(),
        )
        .await;
        h.engine.acquire().await.unwrap();
        h
    }

    fn delta(team: Team, points: u32) -> ScoreDelta {
        ScoreDelta { team, points }
    }

    async fn wait_for_calls(classifier: &ScriptedClassifier, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while classifier.calls.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("classifier was not called in time");
    }

    async fn wait_for_event(events: &mut broadcast::Receiver<ServerEvent>, name: &str) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Ok(event) if event.event.as_deref() == Some(name) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no `{name}` event received"))
    }

    /// Play one round and return once its classification was requested.
    async fn play_round(h: &Harness, expected_calls: usize) -> u32 {
        h.engine.begin_round().await.unwrap();
        let round = h.engine.finish_round().await.unwrap();
        wait_for_calls(&h.classifier, expected_calls).await;
        round
    }

    #[tokio::test]
    async fn scored_round_updates_the_game() {
        let mut h = harness().await;
        let round = play_round(&h, 1).await;
        assert_eq!(h.engine.snapshot().await.status, "Scoring round 1...");

        h.classifier.resolve(0, Ok(delta(Team::Team1, 3)));
        wait_for_event(&mut h.events, "round.scored").await;

        let snapshot = h.engine.snapshot().await;
        assert_eq!(round, 1);
        assert_eq!((snapshot.team1_score, snapshot.team2_score), (3, 0));
        assert_eq!(snapshot.phase, RoundPhase::Idle);
        assert_eq!(snapshot.status, "Round 1: team1 +3");
        assert_eq!(snapshot.rounds[0].inference, InferenceState::Resolved);
        assert!(snapshot.rounds[0].clip_available);
    }

    #[tokio::test]
    async fn superseded_result_never_touches_the_score() {
        let mut h = harness().await;

        play_round(&h, 1).await;
        h.classifier.resolve(0, Ok(delta(Team::Team1, 3)));
        wait_for_event(&mut h.events, "round.scored").await;

        // Round 2 is held by the classifier while round 3 starts.
        play_round(&h, 2).await;
        h.engine.begin_round().await.unwrap();
        wait_for_event(&mut h.events, "round.discarded").await;
        h.engine.finish_round().await.unwrap();
        wait_for_calls(&h.classifier, 3).await;

        h.classifier.resolve(2, Ok(delta(Team::Team2, 1)));
        wait_for_event(&mut h.events, "round.scored").await;
        h.classifier.resolve(1, Ok(delta(Team::Team1, 3)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = h.engine.snapshot().await;
        assert_eq!((snapshot.team1_score, snapshot.team2_score), (3, 1));
        assert_eq!(snapshot.round_count, 3);
        assert_eq!(snapshot.rounds[1].inference, InferenceState::Cancelled);
        assert_eq!(snapshot.rounds[2].inference, InferenceState::Resolved);
        assert_eq!(snapshot.phase, RoundPhase::Idle);
    }

    #[tokio::test]
    async fn settle_checks_token_and_round() {
        let h = harness().await;
        play_round(&h, 1).await;
        let game = h.engine.snapshot().await.game_number;

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        assert!(
            !h.engine
                .settle_inference(game, 1, &cancelled, InferenceOutcome::Scored(delta(Team::Team1, 5)))
                .await
        );

        let live = CancellationToken::new();
        assert!(
            !h.engine
                .settle_inference(game, 2, &live, InferenceOutcome::Scored(delta(Team::Team1, 5)))
                .await
        );

        let snapshot = h.engine.snapshot().await;
        assert_eq!((snapshot.team1_score, snapshot.team2_score), (0, 0));
        assert_eq!(snapshot.phase, RoundPhase::ScoringPending);
    }

    #[tokio::test]
    async fn classifier_timeout_leaves_round_unscored() {
        let mut h = harness_with(
            ScriptedDevice::default(),
            InferencePolicy {
                timeout: Duration::from_millis(10),
                max_retries: 0,
            },
            MemoryKvStore::new(),
        )
        .await;
        h.engine.acquire().await.unwrap();

        play_round(&h, 1).await;
        wait_for_event(&mut h.events, "round.discarded").await;

        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.phase, RoundPhase::Idle);
        assert_eq!(snapshot.status, "Round 1 unscored (classifier timeout)");
        assert_eq!(snapshot.last_error, Some(ErrorKind::ClassifierTimeout));
        assert_eq!(snapshot.rounds[0].inference, InferenceState::Failed);
        assert_eq!((snapshot.team1_score, snapshot.team2_score), (0, 0));

        // The next round starts cleanly.
        h.engine.begin_round().await.unwrap();
        assert_eq!(h.engine.snapshot().await.status, "Recording...");
    }

    #[tokio::test]
    async fn denied_camera_is_reported_and_retried() {
        let h = harness_with(
            ScriptedDevice {
                deny: true,
                ..Default::default()
            },
            InferencePolicy::default(),
            MemoryKvStore::new(),
        )
        .await;

        assert!(matches!(
            h.engine.acquire().await,
            Err(EngineError::DevicePermissionDenied(_))
        ));
        assert!(matches!(
            h.engine.begin_round().await,
            Err(EngineError::DevicePermissionDenied(_))
        ));

        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.phase, RoundPhase::Idle);
        assert_eq!(snapshot.device, CaptureStatus::Error);
        assert_eq!(snapshot.status, "Camera Error");
        assert_eq!(snapshot.round_count, 0);
    }

    #[tokio::test]
    async fn lifecycle_misuse_is_rejected_without_state_change() {
        let h = harness().await;
        assert!(matches!(
            h.engine.finish_round().await,
            Err(EngineError::InvalidState(_))
        ));

        h.engine.begin_round().await.unwrap();
        assert!(matches!(
            h.engine.begin_round().await,
            Err(EngineError::InvalidState(_))
        ));
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.phase, RoundPhase::RoundInFlight);
        assert_eq!(snapshot.round_count, 1);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn manual_edits_keep_last_accepted_value() {
        let h = harness().await;
        for (team, raw) in [
            (Team::Team1, "4"),
            (Team::Team2, " 9 "),
            (Team::Team1, "-1"),
            (Team::Team1, "abc"),
            (Team::Team2, "1000"),
            (Team::Team1, "6"),
            (Team::Team2, "2.5"),
        ] {
            let _ = h.engine.manual_edit(team, raw).await;
        }

        let snapshot = h.engine.snapshot().await;
        assert_eq!((snapshot.team1_score, snapshot.team2_score), (6, 9));
        assert_eq!(snapshot.round_count, 0);
        assert!(matches!(
            h.engine.manual_edit(Team::Team1, "-3").await,
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn empty_game_is_not_recorded() {
        let h = harness().await;
        assert!(matches!(
            h.engine.complete_game().await,
            Err(EngineError::NothingToRecord)
        ));

        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.game_number, 1);
        assert_eq!(snapshot.phase, RoundPhase::Idle);
        assert_eq!(snapshot.game_status, GameStatus::InProgress);
        assert!(h.engine.stats().history().await.is_empty());
        assert_eq!(h.engine.stats().counters().await.total_games, 0);
    }

    #[tokio::test]
    async fn completion_records_winner_and_resets() {
        let mut h = harness().await;
        play_round(&h, 1).await;
        h.classifier.resolve(0, Ok(delta(Team::Team1, 3)));
        wait_for_event(&mut h.events, "round.scored").await;
        h.engine.manual_edit(Team::Team1, "7").await.unwrap();
        h.engine.manual_edit(Team::Team2, "3").await.unwrap();

        let record = h.engine.complete_game().await.unwrap();
        assert_eq!(record.winner, Winner::Team1);
        assert_eq!(record.game_id, 1);
        assert_eq!((record.team1_score, record.team2_score), (7, 3));
        assert_eq!(record.total_rounds, 1);
        wait_for_event(&mut h.events, "game.completed").await;

        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.game_number, 2);
        assert_eq!((snapshot.team1_score, snapshot.team2_score), (0, 0));
        assert_eq!(snapshot.round_count, 0);
        assert_eq!(snapshot.status, "Game 1 complete: team1 wins");

        let counters = h.engine.stats().counters().await;
        assert_eq!((counters.total_games, counters.team1_wins), (1, 1));
        assert_eq!(h.store.raw("totalGames").as_deref(), Some("1"));

        h.engine.manual_edit(Team::Team2, "7").await.unwrap();
        assert_eq!(h.engine.complete_game().await.unwrap().winner, Winner::Team2);
        assert_eq!(h.engine.stats().history().await.len(), 2);
    }

    #[tokio::test]
    async fn equal_scores_record_a_tie() {
        let h = harness().await;
        h.engine.manual_edit(Team::Team1, "4").await.unwrap();
        h.engine.manual_edit(Team::Team2, "4").await.unwrap();

        let record = h.engine.complete_game().await.unwrap();
        assert_eq!(record.winner, Winner::Tie);
        let counters = h.engine.stats().counters().await;
        assert_eq!(counters.total_games, 1);
        assert_eq!(counters.team1_wins + counters.team2_wins, 0);
        assert_eq!(counters.ties, 1);
    }

    #[tokio::test]
    async fn game_numbers_continue_from_persisted_total() {
        let store = MemoryKvStore::new();
        store.insert_raw("totalGames", "4");
        let h = harness_with(ScriptedDevice::default(), InferencePolicy::default(), store).await;
        assert_eq!(h.engine.snapshot().await.game_number, 5);
    }

    #[tokio::test]
    async fn recovered_history_keeps_game_ids_unique() {
        let store = MemoryKvStore::new();
        let seeded = vec![
            FinishedGameRecord {
                game_id: 1,
                winner: Winner::Team1,
                team1_score: 5,
                team2_score: 2,
                total_rounds: 3,
            },
            FinishedGameRecord {
                game_id: 2,
                winner: Winner::Team2,
                team1_score: 1,
                team2_score: 6,
                total_rounds: 4,
            },
        ];
        store.insert_raw("gameHistory", &serde_json::to_string(&seeded).unwrap());
        store.insert_raw("totalGames", "1");
        store.insert_raw("team1Wins", "1");

        let h = harness_with(ScriptedDevice::default(), InferencePolicy::default(), store).await;
        h.engine.acquire().await.unwrap();
        assert_eq!(h.engine.snapshot().await.game_number, 3);

        h.engine.manual_edit(Team::Team1, "4").await.unwrap();
        let record = h.engine.complete_game().await.unwrap();
        assert_eq!(record.game_id, 3);

        let counters = h.engine.stats().counters().await;
        let history = h.engine.stats().history().await;
        assert_eq!(counters.total_games, 3);
        assert_eq!(history.len() as u64, counters.total_games);
        assert_eq!(history.iter().map(|r| r.game_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(h.store.raw("totalGames").as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn unavailable_store_degrades_without_blocking_play() {
        let store = MemoryKvStore::new();
        store.set_offline(true);
        let h = harness_with(ScriptedDevice::default(), InferencePolicy::default(), store).await;
        h.engine.acquire().await.unwrap();

        h.engine.manual_edit(Team::Team1, "2").await.unwrap();
        let record = h.engine.complete_game().await.unwrap();
        assert_eq!(record.winner, Winner::Team1);
        assert!(h.engine.is_degraded());
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.game_number, 2);
        assert_eq!(snapshot.last_error, Some(ErrorKind::PersistenceUnavailable));
        assert_eq!(h.engine.stats().counters().await.total_games, 1);

        h.store.set_offline(false);
        h.engine.manual_edit(Team::Team2, "1").await.unwrap();
        h.engine.complete_game().await.unwrap();
        assert!(!h.engine.is_degraded());
        assert_eq!(h.store.raw("totalGames").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn completing_mid_scoring_drops_the_late_result() {
        let h = harness().await;
        play_round(&h, 1).await;
        h.engine.manual_edit(Team::Team1, "2").await.unwrap();

        let record = h.engine.complete_game().await.unwrap();
        assert_eq!(record.team1_score, 2);
        h.classifier.resolve(0, Ok(delta(Team::Team2, 3)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.game_number, 2);
        assert_eq!((snapshot.team1_score, snapshot.team2_score), (0, 0));
        assert_eq!(snapshot.phase, RoundPhase::Idle);
    }

    #[tokio::test]
    async fn completing_while_recording_abandons_the_round() {
        let h = harness().await;
        h.engine.manual_edit(Team::Team2, "5").await.unwrap();
        h.engine.begin_round().await.unwrap();

        h.engine.complete_game().await.unwrap();
        let snapshot = h.engine.snapshot().await;
        assert_eq!(snapshot.device, CaptureStatus::Ready);
        assert_eq!(snapshot.phase, RoundPhase::Idle);
        h.engine.begin_round().await.unwrap();
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn transition_futures_can_back_handlers() {
        let h = harness().await;
        assert_send(&h.engine.acquire());
        assert_send(&h.engine.begin_round());
        assert_send(&h.engine.finish_round());
        assert_send(&h.engine.manual_edit(Team::Team1, "1"));
        assert_send(&h.engine.complete_game());
        assert_send(&h.engine.snapshot());
        assert_send(&h.engine.shutdown());
    }

    #[tokio::test]
    async fn shutdown_cancels_and_releases() {
        let h = harness().await;
        play_round(&h, 1).await;

        h.engine.shutdown().await;
        assert_eq!(h.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.snapshot().await.device, CaptureStatus::Uninitialized);

        h.classifier.resolve(0, Ok(delta(Team::Team1, 3)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.engine.snapshot().await.team1_score, 0);
    }
}
