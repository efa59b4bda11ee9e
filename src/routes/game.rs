use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::game::{GameSnapshot, RoundResponse, ScoreEditRequest},
    error::{AppError, ErrorBody},
    services::game_service,
    state::{
        SharedEngine,
        game::{FinishedGameRecord, Team, UnknownTeam},
    },
};

/// Routes driving the live game: rounds, score corrections and completion.
pub fn router() -> Router<SharedEngine> {
    Router::new()
        .route("/game", get(get_game))
        .route("/game/rounds/begin", post(begin_round))
        .route("/game/rounds/finish", post(finish_round))
        .route("/game/score/{team}", put(edit_score))
        .route("/game/complete", post(complete_game))
}

/// Current scoreboard view.
#[utoipa::path(
    get,
    path = "/game",
    tag = "game",
    responses((status = 200, description = "Live game snapshot", body = GameSnapshot))
)]
pub async fn get_game(State(engine): State<SharedEngine>) -> Json<GameSnapshot> {
    Json(engine.snapshot().await)
}

/// Start recording a round.
#[utoipa::path(
    post,
    path = "/game/rounds/begin",
    tag = "game",
    responses(
        (status = 200, description = "Recording started", body = RoundResponse),
        (status = 403, description = "Camera permission denied", body = ErrorBody),
        (status = 409, description = "A round is already recording", body = ErrorBody),
        (status = 503, description = "Camera unavailable", body = ErrorBody)
    )
)]
pub async fn begin_round(
    State(engine): State<SharedEngine>,
) -> Result<Json<RoundResponse>, AppError> {
    Ok(Json(game_service::begin_round(&engine).await?))
}

/// Stop recording and hand the clip to the classifier.
#[utoipa::path(
    post,
    path = "/game/rounds/finish",
    tag = "game",
    responses(
        (status = 200, description = "Round submitted for scoring", body = RoundResponse),
        (status = 409, description = "No round is recording", body = ErrorBody),
        (status = 503, description = "Camera failed while recording", body = ErrorBody)
    )
)]
pub async fn finish_round(
    State(engine): State<SharedEngine>,
) -> Result<Json<RoundResponse>, AppError> {
    Ok(Json(game_service::finish_round(&engine).await?))
}

/// Overwrite a team's score.
#[utoipa::path(
    put,
    path = "/game/score/{team}",
    tag = "game",
    params(("team" = String, Path, description = "`team1` or `team2`")),
    request_body = ScoreEditRequest,
    responses(
        (status = 200, description = "Score updated", body = GameSnapshot),
        (status = 400, description = "Value is not a non-negative integer", body = ErrorBody)
    )
)]
pub async fn edit_score(
    State(engine): State<SharedEngine>,
    Path(team): Path<String>,
    Valid(Json(payload)): Valid<Json<ScoreEditRequest>>,
) -> Result<Json<GameSnapshot>, AppError> {
    let team: Team = team
        .parse()
        .map_err(|err: UnknownTeam| AppError::NotFound(err.to_string()))?;
    Ok(Json(game_service::edit_score(&engine, team, &payload).await?))
}

/// Record the current game and start the next one.
#[utoipa::path(
    post,
    path = "/game/complete",
    tag = "game",
    responses(
        (status = 200, description = "Game recorded", body = FinishedGameRecord),
        (status = 409, description = "Both scores are zero", body = ErrorBody)
    )
)]
pub async fn complete_game(
    State(engine): State<SharedEngine>,
) -> Result<Json<FinishedGameRecord>, AppError> {
    Ok(Json(game_service::complete_game(&engine).await?))
}
