use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe storage and report whether the backend runs degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let reachable = match state.game_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                false
            }
        },
        None => {
            warn!("storage unavailable (degraded mode)");
            false
        }
    };

    let in_flight = state.media().in_flight();
    if reachable && !state.is_degraded().await {
        HealthResponse::ok(in_flight)
    } else {
        HealthResponse::degraded(reachable, in_flight)
    }
}
