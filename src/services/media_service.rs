use std::time::SystemTime;

use tracing::warn;

use crate::{
    dto::media::EvictRequest,
    error::ServiceError,
    media::{CacheStats, EvictionReport, MediaLookup},
    providers::TrackSearchItem,
    state::SharedState,
};

const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Resolve a track to a playable upload.
///
/// Storage is optional here: while degraded the lookup still reaches the provider.
pub async fn resolve(
    state: &SharedState,
    artist: &str,
    track: &str,
    prefer_video: bool,
) -> MediaLookup {
    let store = match state.require_store().await {
        Ok(store) => Some(store),
        Err(err) => {
            warn!(error = %err, "resolving media without the durable cache");
            None
        }
    };
    state.media().resolve(store, artist, track, prefer_video).await
}

/// Aggregate counts over the durable cache.
pub async fn stats(state: &SharedState) -> Result<CacheStats, ServiceError> {
    let store = state.require_store().await?;
    Ok(state.media().stats(store).await?)
}

/// Run one eviction sweep with optional overrides of the configured policy.
pub async fn evict(state: &SharedState, overrides: EvictRequest) -> Result<EvictionReport, ServiceError> {
    let store = state.require_store().await?;
    let policy = overrides.merge_into(&state.config().media().eviction);
    Ok(state.media().evict(store, &policy, SystemTime::now()).await?)
}

/// Look up track metadata for song selection.
pub async fn search_songs(
    state: &SharedState,
    query: &str,
    limit: Option<u32>,
) -> Result<Vec<TrackSearchItem>, ServiceError> {
    state
        .track_search()
        .search(query.trim().to_owned(), limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .await
        .map_err(|err| {
            warn!(error = %err, transient = err.is_transient(), "song search failed");
            ServiceError::from(err)
        })
}
