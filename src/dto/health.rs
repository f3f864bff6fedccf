use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether session storage answered its last health check.
    pub storage_reachable: bool,
    /// Media lookups currently running or suppressed in this process.
    pub in_flight_lookups: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(in_flight_lookups: usize) -> Self {
        Self {
            status: "ok".to_string(),
            storage_reachable: true,
            in_flight_lookups,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(storage_reachable: bool, in_flight_lookups: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            storage_reachable,
            in_flight_lookups,
        }
    }
}
