use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::media::{EvictRequest, LookupStatus, MediaLookupResponse, ResolveMediaQuery},
    error::AppError,
    media::{CacheStats, EvictionReport},
    services::media_service,
    state::SharedState,
};

const MAINTENANCE_TOKEN_HEADER: &str = "x-maintenance-token";

/// Media lookup plus the token-guarded cache maintenance endpoints.
pub fn router(state: SharedState) -> Router<SharedState> {
    let maintenance = Router::new()
        .route("/media/stats", get(cache_stats))
        .route("/media/evict", post(evict))
        .route_layer(middleware::from_fn_with_state(
            state,
            require_maintenance_token,
        ));

    Router::new()
        .route("/media/resolve", get(resolve))
        .merge(maintenance)
}

/// Resolve a track to a playable upload, sharing concurrent lookups and caching the answer.
#[utoipa::path(
    get,
    path = "/media/resolve",
    tag = "media",
    params(ResolveMediaQuery),
    responses(
        (status = 200, description = "Upload found", body = MediaLookupResponse),
        (status = 404, description = "No acceptable upload exists", body = MediaLookupResponse),
        (status = 503, description = "Provider unavailable; retry later", body = MediaLookupResponse)
    )
)]
pub async fn resolve(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<ResolveMediaQuery>>,
) -> (StatusCode, Json<MediaLookupResponse>) {
    let lookup =
        media_service::resolve(&state, &query.artist, &query.track, query.prefer_video).await;
    let response = MediaLookupResponse::from(lookup);
    let status = match response.status {
        LookupStatus::Found => StatusCode::OK,
        LookupStatus::NotFound => StatusCode::NOT_FOUND,
        LookupStatus::TemporarilyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(response))
}

/// Aggregate counts over the lookup cache.
#[utoipa::path(
    get,
    path = "/media/stats",
    tag = "media",
    params(("X-Maintenance-Token" = String, Header, description = "Maintenance token")),
    responses(
        (status = 200, description = "Cache statistics", body = CacheStats),
        (status = 401, description = "Missing or invalid token", body = crate::error::ErrorBody)
    )
)]
pub async fn cache_stats(State(state): State<SharedState>) -> Result<Json<CacheStats>, AppError> {
    Ok(Json(media_service::stats(&state).await?))
}

/// Run one eviction sweep; body fields override the configured policy.
#[utoipa::path(
    post,
    path = "/media/evict",
    tag = "media",
    params(("X-Maintenance-Token" = String, Header, description = "Maintenance token")),
    request_body = EvictRequest,
    responses(
        (status = 200, description = "Sweep report", body = EvictionReport),
        (status = 401, description = "Missing or invalid token", body = crate::error::ErrorBody)
    )
)]
pub async fn evict(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<EvictRequest>>,
) -> Result<Json<EvictionReport>, AppError> {
    Ok(Json(media_service::evict(&state, payload).await?))
}

async fn require_maintenance_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.maintenance_token() else {
        return Err(AppError::Unauthorized(
            "maintenance endpoints are disabled".into(),
        ));
    };

    let provided = req
        .headers()
        .get(MAINTENANCE_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing maintenance token header `X-Maintenance-Token`".into())
        })?;

    if provided == expected {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthorized("invalid maintenance token".into()))
    }
}
