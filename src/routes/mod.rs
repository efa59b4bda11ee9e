use axum::Router;

use crate::state::SharedEngine;

pub mod device;
pub mod docs;
pub mod game;
pub mod health;
pub mod sse;
pub mod stats;

/// Compose all route trees, wiring in the engine and documentation routes.
pub fn router(engine: SharedEngine) -> Router<()> {
    health::router()
        .merge(device::router())
        .merge(game::router())
        .merge(stats::router())
        .merge(sse::router())
        .merge(docs::router())
        .with_state(engine)
}
