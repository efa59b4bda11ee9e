use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dao::stats::StatsCounters,
    dto::game::HistoryQuery,
    services::game_service,
    state::{SharedEngine, game::FinishedGameRecord},
};

/// Read-only stats and history routes.
pub fn router() -> Router<SharedEngine> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/history", get(get_history))
}

/// Aggregate counters across all recorded games.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "stats",
    responses((status = 200, description = "Game counters", body = StatsCounters))
)]
pub async fn get_stats(State(engine): State<SharedEngine>) -> Json<StatsCounters> {
    Json(game_service::stats(&engine).await)
}

/// Finished games, newest first by default.
#[utoipa::path(
    get,
    path = "/history",
    tag = "stats",
    params(HistoryQuery),
    responses((status = 200, description = "Finished games", body = [FinishedGameRecord]))
)]
pub async fn get_history(
    State(engine): State<SharedEngine>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<FinishedGameRecord>> {
    let order = query.order.unwrap_or_default();
    Json(game_service::history(&engine, order).await)
}
