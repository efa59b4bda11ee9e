use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::game::DeviceResponse,
    error::{AppError, ErrorBody},
    services::game_service,
    state::SharedEngine,
};

/// (Re)acquire the capture device, e.g. after the user granted permission.
#[utoipa::path(
    post,
    path = "/device/acquire",
    tag = "device",
    responses(
        (status = 200, description = "Camera ready", body = DeviceResponse),
        (status = 403, description = "Camera permission denied", body = ErrorBody),
        (status = 503, description = "No usable camera", body = ErrorBody)
    )
)]
pub async fn acquire(State(engine): State<SharedEngine>) -> Result<Json<DeviceResponse>, AppError> {
    Ok(Json(game_service::acquire_device(&engine).await?))
}

/// Configure the device routes.
pub fn router() -> Router<SharedEngine> {
    Router::new().route("/device/acquire", post(acquire))
}
