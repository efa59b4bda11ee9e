use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedEngine};

/// Report degraded mode while logging backend connectivity issues.
pub async fn health_status(engine: &SharedEngine) -> HealthResponse {
    let stats = engine.stats();
    if let Err(err) = stats.health_check().await {
        warn!(storage = stats.backend_name(), error = %err, "storage health check failed");
    }

    if engine.is_degraded() {
        HealthResponse::degraded(stats.backend_name())
    } else {
        HealthResponse::ok(stats.backend_name())
    }
}
