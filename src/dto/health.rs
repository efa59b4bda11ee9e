use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Stats backend name.
    pub storage: String,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(storage: &str) -> Self {
        Self {
            status: "ok".to_string(),
            storage: storage.to_string(),
        }
    }

    /// Create a health response indicating stats writes are failing.
    pub fn degraded(storage: &str) -> Self {
        Self {
            status: "degraded".to_string(),
            storage: storage.to_string(),
        }
    }
}
