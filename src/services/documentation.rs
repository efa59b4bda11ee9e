use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Bagtoss Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::device::acquire,
        crate::routes::game::get_game,
        crate::routes::game::begin_round,
        crate::routes::game::finish_round,
        crate::routes::game::edit_score,
        crate::routes::game::complete_game,
        crate::routes::stats::get_stats,
        crate::routes::stats::get_history,
        crate::routes::sse::events_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::GameSnapshot,
            crate::dto::game::RoundSummary,
            crate::dto::game::RoundResponse,
            crate::dto::game::ScoreEditRequest,
            crate::dto::game::DeviceResponse,
            crate::dto::game::HistoryOrder,
            crate::dto::sse::Handshake,
            crate::dto::sse::RoundScoredEvent,
            crate::dto::sse::RoundDiscardedEvent,
            crate::dto::sse::DiscardReason,
            crate::dto::sse::GameCompletedEvent,
            crate::dto::sse::StatsUpdatedEvent,
            crate::dao::stats::StatsCounters,
            crate::error::ErrorBody,
            crate::error::ErrorKind,
            crate::state::game::FinishedGameRecord,
            crate::state::game::Winner,
            crate::state::game::ScoreDelta,
            crate::state::game::Team,
            crate::state::game::InferenceState,
            crate::state::state_machine::RoundPhase,
            crate::capture::CaptureStatus,
            crate::capture::PreviewInfo,
            crate::capture::Facing,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "device", description = "Capture device management"),
        (name = "game", description = "Round lifecycle and score edits"),
        (name = "stats", description = "Persisted counters and game history"),
        (name = "sse", description = "Server-sent events stream"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/device/acquire",
            "/game",
            "/game/rounds/begin",
            "/game/rounds/finish",
            "/game/score/{team}",
            "/game/complete",
            "/stats",
            "/history",
            "/sse/events",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
