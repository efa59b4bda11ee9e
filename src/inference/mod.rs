//! Round scoring through an external classifier.
//!
//! [`ScoreClassifier`] is the opaque remote capability; [`ScoreInferenceClient`]
//! wraps it with a bounded wait, an optional retry budget and the cancellation
//! bookkeeping that lets a newer round supersede an older request.

mod http;
mod simulated;

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::{sync::Mutex, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{capture::Clip, state::game::ScoreDelta};

pub use http::HttpClassifier;
pub use simulated::SimulatedClassifier;

/// Failures reported by a classifier attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    /// Network/service failure or a malformed payload.
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    /// No answer within the bounded wait.
    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),
    /// The request was superseded before it resolved.
    #[error("classification cancelled")]
    Cancelled,
}

/// Opaque scoring capability: clip in, score delta out.
pub trait ScoreClassifier: Send + Sync {
    /// Classifier name used in logs.
    fn name(&self) -> &str;

    /// Classify `clip`. Implementations should stop work once `cancel` fires,
    /// but callers never rely on it: a late answer is discarded regardless.
    fn classify(
        &self,
        clip: Arc<Clip>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<ScoreDelta, ClassifierError>>;
}

/// Final result of an inference request, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    /// The classifier produced a delta.
    Scored(ScoreDelta),
    /// The round stays unscored (fail-open).
    Skipped(ClassifierError),
    /// The request was superseded; its result must not be applied.
    Cancelled,
}

/// Wait and retry policy applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferencePolicy {
    /// Bound on each attempt.
    pub timeout: Duration,
    /// Extra attempts after a failure. Zero means skip the round on the first failure.
    pub max_retries: u32,
}

impl Default for InferencePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 0,
        }
    }
}

/// Issued classification that can be awaited or cancelled.
pub struct PendingInference {
    token: CancellationToken,
    outcome: BoxFuture<'static, InferenceOutcome>,
}

impl PendingInference {
    /// Token guarding this request; cancelled once the request is superseded.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Drive the request to completion.
    pub async fn outcome(self) -> InferenceOutcome {
        self.outcome.await
    }
}

/// Classifier front-end owning the "latest request wins" rule.
pub struct ScoreInferenceClient {
    classifier: Arc<dyn ScoreClassifier>,
    policy: InferencePolicy,
    outstanding: Mutex<Option<CancellationToken>>,
}

impl ScoreInferenceClient {
    /// Wrap `classifier` with `policy`; nothing is outstanding yet.
    pub fn new(classifier: Arc<dyn ScoreClassifier>, policy: InferencePolicy) -> Self {
        Self {
            classifier,
            policy,
            outstanding: Mutex::new(None),
        }
    }

    /// Name of the wrapped classifier, for logs.
    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }

    /// Submit `clip`, cancelling whatever request was still outstanding.
    pub async fn classify(&self, clip: Arc<Clip>) -> PendingInference {
        let token = CancellationToken::new();
        {
            let mut outstanding = self.outstanding.lock().await;
            if let Some(previous) = outstanding.replace(token.clone()) {
                previous.cancel();
            }
        }

        let classifier = Arc::clone(&self.classifier);
        let policy = self.policy;
        let request_token = token.clone();
        PendingInference {
            token,
            outcome: Box::pin(run_attempts(classifier, policy, clip, request_token)),
        }
    }

    /// Cancel the outstanding request, if any.
    pub async fn cancel_outstanding(&self) {
        if let Some(token) = self.outstanding.lock().await.take() {
            token.cancel();
        }
    }
}

async fn run_attempts(
    classifier: Arc<dyn ScoreClassifier>,
    policy: InferencePolicy,
    clip: Arc<Clip>,
    token: CancellationToken,
) -> InferenceOutcome {
    let mut attempt = 0;
    loop {
        let request = classifier.classify(Arc::clone(&clip), token.clone());
        let result = tokio::select! {
            _ = token.cancelled() => Err(ClassifierError::Cancelled),
            answer = timeout(policy.timeout, request) => match answer {
                Ok(result) => result,
                Err(_) => Err(ClassifierError::Timeout(policy.timeout)),
            },
        };

        if token.is_cancelled() {
            debug!(clip = %clip.id(), "classification superseded");
            return InferenceOutcome::Cancelled;
        }

        match result {
            Ok(delta) => return InferenceOutcome::Scored(delta),
            Err(ClassifierError::Cancelled) => return InferenceOutcome::Cancelled,
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    classifier = classifier.name(),
                    attempt,
                    error = %err,
                    "classification failed; retrying"
                );
            }
            Err(err) => {
                warn!(
                    classifier = classifier.name(),
                    error = %err,
                    "classification failed; round left unscored"
                );
                return InferenceOutcome::Skipped(err);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::oneshot;

    use super::*;
    use crate::{capture::Segment, state::game::Team};

    /// Classifier whose answers are released by the test, one channel per call.
    #[derive(Default)]
    pub(crate) struct ScriptedClassifier {
        pub calls: Arc<AtomicUsize>,
        pub pending: Arc<std::sync::Mutex<Vec<oneshot::Sender<Result<ScoreDelta, ClassifierError>>>>>,
    }

    impl ScriptedClassifier {
        /// Resolve the `call`-th request (0-based) with `result`.
        pub fn resolve(&self, call: usize, result: Result<ScoreDelta, ClassifierError>) {
            let sender = {
                let mut pending = self.pending.lock().unwrap();
                std::mem::replace(&mut pending[call], oneshot::channel().0)
            };
            let _ = sender.send(result);
        }
    }

    impl ScoreClassifier for ScriptedClassifier {
        fn name(&self) -> &str {
            "scripted"
        }

        fn classify(
            &self,
            _clip: Arc<Clip>,
            _cancel: CancellationToken,
        ) -> BoxFuture<'static, Result<ScoreDelta, ClassifierError>> {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().push(tx);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                rx.await
                    .unwrap_or_else(|_| Err(ClassifierError::Unavailable("dropped".into())))
            })
        }
    }

    /// Classifier failing a fixed number of times before answering.
    struct FlakyClassifier {
        failures: AtomicUsize,
    }

    impl ScoreClassifier for FlakyClassifier {
        fn name(&self) -> &str {
            "flaky"
        }

        fn classify(
            &self,
            _clip: Arc<Clip>,
            _cancel: CancellationToken,
        ) -> BoxFuture<'static, Result<ScoreDelta, ClassifierError>> {
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            Box::pin(async move {
                if fail {
                    Err(ClassifierError::Unavailable("503".into()))
                } else {
                    Ok(ScoreDelta {
                        team: Team::Team2,
                        points: 1,
                    })
                }
            })
        }
    }

    pub(crate) fn clip() -> Arc<Clip> {
        Arc::new(Clip::from_segments(
            "video/webm",
            vec![Segment {
                sequence: 0,
                bytes: vec![1, 2, 3],
            }],
        ))
    }

    fn delta(team: Team, points: u32) -> ScoreDelta {
        ScoreDelta { team, points }
    }

    #[tokio::test]
    async fn resolved_request_is_scored() {
        let scripted = Arc::new(ScriptedClassifier::default());
        let client = ScoreInferenceClient::new(scripted.clone(), InferencePolicy::default());

        let pending = client.classify(clip()).await;
        let task = tokio::spawn(pending.outcome());
        tokio::task::yield_now().await;
        while scripted.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        scripted.resolve(0, Ok(delta(Team::Team1, 3)));

        assert_eq!(
            task.await.unwrap(),
            InferenceOutcome::Scored(delta(Team::Team1, 3))
        );
    }

    #[tokio::test]
    async fn new_request_cancels_previous_one() {
        let scripted = Arc::new(ScriptedClassifier::default());
        let client = ScoreInferenceClient::new(scripted.clone(), InferencePolicy::default());

        let first = client.classify(clip()).await;
        let first_token = first.token();
        let first_task = tokio::spawn(first.outcome());
        let _second = client.classify(clip()).await;

        assert!(first_token.is_cancelled());
        assert_eq!(first_task.await.unwrap(), InferenceOutcome::Cancelled);
    }

    #[tokio::test]
    async fn slow_classifier_times_out_and_is_skipped() {
        let scripted = Arc::new(ScriptedClassifier::default());
        let client = ScoreInferenceClient::new(
            scripted,
            InferencePolicy {
                timeout: Duration::from_millis(10),
                max_retries: 0,
            },
        );

        let outcome = client.classify(clip()).await.outcome().await;
        assert_eq!(
            outcome,
            InferenceOutcome::Skipped(ClassifierError::Timeout(Duration::from_millis(10)))
        );
    }

    #[tokio::test]
    async fn retries_are_bounded_by_policy() {
        let flaky = Arc::new(FlakyClassifier {
            failures: AtomicUsize::new(2),
        });
        let no_retry = ScoreInferenceClient::new(flaky.clone(), InferencePolicy::default());
        assert!(matches!(
            no_retry.classify(clip()).await.outcome().await,
            InferenceOutcome::Skipped(ClassifierError::Unavailable(_))
        ));

        let retrying = ScoreInferenceClient::new(
            flaky,
            InferencePolicy {
                timeout: Duration::from_secs(1),
                max_retries: 1,
            },
        );
        assert_eq!(
            retrying.classify(clip()).await.outcome().await,
            InferenceOutcome::Scored(delta(Team::Team2, 1))
        );
    }
}
