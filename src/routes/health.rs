use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::health::HealthResponse, services::health_service, state::SharedEngine};

#[utoipa::path(
    get,
    path = "/healthcheck",
    tag = "health",
    responses((status = 200, description = "Service is up; `degraded` when stats writes fail", body = HealthResponse))
)]
/// Return the current health status and ping the stats backend.
pub async fn healthcheck(State(engine): State<SharedEngine>) -> Json<HealthResponse> {
    Json(health_service::health_status(&engine).await)
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedEngine> {
    Router::<SharedEngine>::new().route("/healthcheck", get(healthcheck))
}
