use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::{ClassifierError, ScoreClassifier};
use crate::{
    capture::Clip,
    state::game::{ScoreDelta, Team},
};

/// Highest number of points a simulated round can award.
const MAX_SIMULATED_POINTS: u32 = 3;

/// Stand-in classifier answering with a random delta after a fixed delay.
#[derive(Debug, Clone)]
pub struct SimulatedClassifier {
    delay: Duration,
}

impl SimulatedClassifier {
    /// Classifier answering after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ScoreClassifier for SimulatedClassifier {
    fn name(&self) -> &str {
        "simulated"
    }

    fn classify(
        &self,
        _clip: Arc<Clip>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<ScoreDelta, ClassifierError>> {
        let delay = self.delay;
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(ClassifierError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(random_delta()),
            }
        })
    }
}

fn random_delta() -> ScoreDelta {
    let mut rng = rand::rng();
    let team = if rng.random_bool(0.5) {
        Team::Team1
    } else {
        Team::Team2
    };
    ScoreDelta {
        team,
        points: rng.random_range(0..=MAX_SIMULATED_POINTS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tests::clip;

    #[tokio::test]
    async fn answers_within_range() {
        let classifier = SimulatedClassifier::new(Duration::from_millis(1));
        for _ in 0..20 {
            let delta = classifier
                .classify(clip(), CancellationToken::new())
                .await
                .unwrap();
            assert!(delta.points <= MAX_SIMULATED_POINTS);
        }
    }

    #[tokio::test]
    async fn honours_cancellation() {
        let classifier = SimulatedClassifier::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            classifier.classify(clip(), token).await,
            Err(ClassifierError::Cancelled)
        );
    }
}
