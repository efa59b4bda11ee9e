use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::{ClassifierError, ScoreClassifier};
use crate::{
    capture::Clip,
    state::game::{ScoreDelta, Team},
};

/// Remote classifier reached over HTTP with a multipart upload.
#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    url: Arc<str>,
}

impl HttpClassifier {
    /// Build a classifier posting clips to `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ClassifierError::Unavailable(format!("client setup failed: {err}")))?;
        Ok(Self {
            client,
            url: Arc::from(url.into()),
        })
    }

    async fn submit(&self, clip: Arc<Clip>) -> Result<ScoreDelta, ClassifierError> {
        let video = Part::bytes(clip.data().to_vec())
            .file_name("round.webm")
            .mime_str(clip.mime_type())
            .map_err(|err| ClassifierError::Unavailable(format!("invalid clip type: {err}")))?;
        let form = Form::new()
            .part("video", video)
            .text("expected_shape", expected_shape().to_string());

        let response = self
            .client
            .post(self.url.as_ref())
            .multipart(form)
            .send()
            .await
            .map_err(|err| ClassifierError::Unavailable(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Unavailable(format!(
                "classifier answered {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| ClassifierError::Unavailable(format!("reading body failed: {err}")))?;
        parse_payload(&body)
    }
}

impl ScoreClassifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    fn classify(
        &self,
        clip: Arc<Clip>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<ScoreDelta, ClassifierError>> {
        let classifier = self.clone();
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(ClassifierError::Cancelled),
                result = classifier.submit(clip) => result,
            }
        })
    }
}

/// JSON schema sent alongside the clip describing the answer we accept.
fn expected_shape() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["team", "points"],
        "properties": {
            "team": { "type": "string", "enum": ["team1", "team2"] },
            "points": { "type": "integer", "minimum": 0 }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifierPayload {
    Flat {
        team: String,
        points: i64,
    },
    Nested {
        round_outcome: RoundOutcome,
    },
}

#[derive(Debug, Deserialize)]
struct RoundOutcome {
    score: OutcomeScore,
}

#[derive(Debug, Deserialize)]
struct OutcomeScore {
    winning_team: String,
    score_difference: i64,
}

/// Decode a classifier answer; anything malformed counts as unavailable.
fn parse_payload(body: &[u8]) -> Result<ScoreDelta, ClassifierError> {
    let payload: ClassifierPayload = serde_json::from_slice(body)
        .map_err(|err| ClassifierError::Unavailable(format!("malformed payload: {err}")))?;

    let (team, points) = match payload {
        ClassifierPayload::Flat { team, points } => (team, points),
        ClassifierPayload::Nested { round_outcome } => (
            round_outcome.score.winning_team,
            round_outcome.score.score_difference,
        ),
    };

    let team: Team = team
        .parse()
        .map_err(|err| ClassifierError::Unavailable(format!("malformed payload: {err}")))?;
    let points = u32::try_from(points).map_err(|_| {
        ClassifierError::Unavailable(format!("malformed payload: invalid points {points}"))
    })?;

    Ok(ScoreDelta { team, points })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_payload_is_accepted() {
        let delta = parse_payload(br#"{"team":"team2","points":3}"#).unwrap();
        assert_eq!(
            delta,
            ScoreDelta {
                team: Team::Team2,
                points: 3
            }
        );
    }

    #[test]
    fn nested_round_outcome_is_accepted() {
        let body = br#"{"round_outcome":{"score":{"winning_team":"team1","score_difference":4}}}"#;
        assert_eq!(
            parse_payload(body).unwrap(),
            ScoreDelta {
                team: Team::Team1,
                points: 4
            }
        );
    }

    #[test]
    fn malformed_payloads_are_unavailable() {
        for body in [
            &br#"{"team":"team3","points":1}"#[..],
            br#"{"team":"team1","points":-2}"#,
            br#"{"team":"team1"}"#,
            br#"not json"#,
        ] {
            assert!(matches!(
                parse_payload(body),
                Err(ClassifierError::Unavailable(_))
            ));
        }
    }

    #[test]
    fn expected_shape_names_both_teams() {
        let shape = expected_shape();
        assert_eq!(
            shape["properties"]["team"]["enum"],
            json!(["team1", "team2"])
        );
    }
}
