use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use axum_valid::Valid;

use crate::{
    dto::media::SongSearchQuery, error::AppError, providers::TrackSearchItem,
    services::media_service, state::SharedState,
};

/// Track metadata search used while picking a song.
pub fn router() -> Router<SharedState> {
    Router::new().route("/songs/search", get(search_songs))
}

/// Search tracks by free text.
#[utoipa::path(
    get,
    path = "/songs/search",
    tag = "songs",
    params(SongSearchQuery),
    responses(
        (status = 200, description = "Matching tracks", body = [TrackSearchItem]),
        (status = 503, description = "Search provider unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn search_songs(
    State(state): State<SharedState>,
    Valid(Query(query)): Valid<Query<SongSearchQuery>>,
) -> Result<Json<Vec<TrackSearchItem>>, AppError> {
    Ok(Json(
        media_service::search_songs(&state, &query.q, query.limit).await?,
    ))
}
