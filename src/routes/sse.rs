use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{services::sse_service, state::SharedEngine};

#[utoipa::path(
    get,
    path = "/sse/events",
    tag = "sse",
    responses((status = 200, description = "Engine event stream", content_type = "text/event-stream", body = String))
)]
/// Stream engine events (snapshots, scored and discarded rounds, completed games).
pub async fn events_stream(
    State(engine): State<SharedEngine>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe(&engine);
    let initial = sse_service::initial_events(&engine).await;
    info!(subscribers = engine.sse().subscriber_count(), "new SSE connection");
    sse_service::to_sse_stream(initial, receiver)
}

/// Configure the SSE endpoint.
pub fn router() -> Router<SharedEngine> {
    Router::<SharedEngine>::new().route("/sse/events", get(events_stream))
}
