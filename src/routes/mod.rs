use axum::{Router, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{error::AppError, state::SharedState};

pub mod docs;
pub mod health;
pub mod media;
pub mod sessions;
pub mod songs;

const PLAYER_ID_HEADER: &str = "x-player-id";

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sessions::router())
        .merge(songs::router())
        .merge(media::router(state.clone()));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

/// Player performing the request, read from the `X-Player-Id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingPlayer(pub Uuid);

impl<S> FromRequestParts<S> for ActingPlayer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PLAYER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing player header `X-Player-Id`".into()))?;
        let raw = raw
            .to_str()
            .map_err(|_| AppError::BadRequest("`X-Player-Id` is not valid text".into()))?;
        Uuid::parse_str(raw.trim())
            .map(ActingPlayer)
            .map_err(|_| AppError::BadRequest("`X-Player-Id` must be a UUID".into()))
    }
}
