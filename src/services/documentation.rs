use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Mixtape Party backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::join_session,
        crate::routes::sessions::get_session,
        crate::routes::sessions::get_session_by_code,
        crate::routes::sessions::toggle_ready,
        crate::routes::sessions::force_start,
        crate::routes::sessions::submit_song,
        crate::routes::sessions::submit_pass,
        crate::routes::sessions::end_selecting,
        crate::routes::sessions::cast_vote,
        crate::routes::sessions::end_voting,
        crate::routes::sessions::next_round,
        crate::routes::sessions::end_game,
        crate::routes::sessions::start_countdown,
        crate::routes::sessions::cancel_countdown,
        crate::routes::songs::search_songs,
        crate::routes::media::resolve,
        crate::routes::media::cache_stats,
        crate::routes::media::evict,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::PromptInput,
            crate::dto::session::RoundStartRequest,
            crate::dto::session::SubmissionRequest,
            crate::dto::session::VoteRequest,
            crate::dto::session::CountdownRequest,
            crate::dto::session::SessionView,
            crate::dto::session::SubmissionResponse,
            crate::dto::session::SelectionClosedResponse,
            crate::dto::session::VotingClosedResponse,
            crate::dto::session::GameEndedResponse,
            crate::dto::media::MediaLookupResponse,
            crate::dto::media::EvictRequest,
            crate::media::CacheStats,
            crate::media::EvictionReport,
            crate::providers::TrackSearchItem,
            crate::error::ErrorBody,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Session lifecycle, rounds, votes and countdowns"),
        (name = "songs", description = "Track metadata search"),
        (name = "media", description = "Media lookup cache and its maintenance"),
    )
)]
pub struct ApiDoc;
