use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        CountdownRequest, CreateSessionRequest, GameEndedResponse, JoinSessionRequest,
        RoundStartRequest, SelectionClosedResponse, SessionView, SubmissionRequest,
        SubmissionResponse, VoteRequest, VotingClosedResponse,
    },
    error::AppError,
    routes::ActingPlayer,
    services::session_service,
    state::{SharedState, session::SubmissionContent},
};

/// Session lifecycle and round endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions/code/{code}", get(get_session_by_code))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/ready", post(toggle_ready))
        .route("/sessions/{id}/start", post(force_start))
        .route("/sessions/{id}/submission", post(submit_song))
        .route("/sessions/{id}/pass", post(submit_pass))
        .route("/sessions/{id}/selecting/end", post(end_selecting))
        .route("/sessions/{id}/votes", post(cast_vote))
        .route("/sessions/{id}/voting/end", post(end_voting))
        .route("/sessions/{id}/rounds/next", post(next_round))
        .route("/sessions/{id}/end", post(end_game))
        .route(
            "/sessions/{id}/countdown",
            post(start_countdown).delete(cancel_countdown),
        )
}

/// Open a new session; the acting player becomes its host.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "sessions",
    params(("X-Player-Id" = Uuid, Header, description = "Acting player")),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionView),
        (status = 503, description = "Storage unavailable", body = crate::error::ErrorBody)
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    ActingPlayer(player): ActingPlayer,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let session = session_service::create_session(&state, player, payload.host_name).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Join a session by its code.
#[utoipa::path(
    post,
    path = "/sessions/join",
    tag = "sessions",
    params(("X-Player-Id" = Uuid, Header, description = "Acting player")),
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Joined, or already on the roster", body = SessionView),
        (status = 404, description = "Unknown code", body = crate::error::ErrorBody),
        (status = 409, description = "Session has ended", body = crate::error::ErrorBody)
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    ActingPlayer(player): ActingPlayer,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let session =
        session_service::join_session(&state, &payload.code, player, payload.name).await?;
    Ok(Json(session))
}

/// Current session projection; also applies an expired countdown.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session", body = SessionView),
        (status = 404, description = "Unknown session", body = crate::error::ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::get_session(&state, id).await?))
}

/// Session projection looked up by join code.
#[utoipa::path(
    get,
    path = "/sessions/code/{code}",
    tag = "sessions",
    params(("code" = String, Path, description = "Six letter join code")),
    responses(
        (status = 200, description = "Session", body = SessionView),
        (status = 404, description = "Unknown code", body = crate::error::ErrorBody)
    )
)]
pub async fn get_session_by_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(
        session_service::get_session_by_code(&state, &code).await?,
    ))
}

/// Toggle the acting player's ready flag.
#[utoipa::path(
    post,
    path = "/sessions/{id}/ready",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    responses(
        (status = 200, description = "Ready flag toggled", body = SessionView),
        (status = 409, description = "Not in the lobby", body = crate::error::ErrorBody)
    )
)]
pub async fn toggle_ready(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::toggle_ready(&state, id, player).await?))
}

/// Host starts the game with the players that are ready.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    request_body = RoundStartRequest,
    responses(
        (status = 200, description = "First round opened", body = SessionView),
        (status = 403, description = "Not the host", body = crate::error::ErrorBody),
        (status = 409, description = "Wrong phase or too few players", body = crate::error::ErrorBody)
    )
)]
pub async fn force_start(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
    Valid(Json(payload)): Valid<Json<RoundStartRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let prompt = payload.prompt.map(Into::into);
    Ok(Json(
        session_service::force_start(&state, id, player, prompt).await?,
    ))
}

/// Submit a song for the current prompt; resubmitting replaces the previous choice.
#[utoipa::path(
    post,
    path = "/sessions/{id}/submission",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    request_body = SubmissionRequest,
    responses(
        (status = 200, description = "Submission recorded", body = SubmissionResponse),
        (status = 403, description = "Not an active participant", body = crate::error::ErrorBody),
        (status = 409, description = "Selection is closed", body = crate::error::ErrorBody)
    )
)]
pub async fn submit_song(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
    Valid(Json(payload)): Valid<Json<SubmissionRequest>>,
) -> Result<Json<SubmissionResponse>, AppError> {
    Ok(Json(
        session_service::submit(&state, id, player, payload.into()).await?,
    ))
}

/// Pass on the current round.
#[utoipa::path(
    post,
    path = "/sessions/{id}/pass",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    responses(
        (status = 200, description = "Pass recorded", body = SubmissionResponse),
        (status = 409, description = "Selection is closed", body = crate::error::ErrorBody)
    )
)]
pub async fn submit_pass(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
) -> Result<Json<SubmissionResponse>, AppError> {
    Ok(Json(
        session_service::submit(&state, id, player, SubmissionContent::Pass).await?,
    ))
}

/// Host closes the selection; missing players are recorded as forced passes.
#[utoipa::path(
    post,
    path = "/sessions/{id}/selecting/end",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    responses(
        (status = 200, description = "Voting opened", body = SelectionClosedResponse),
        (status = 403, description = "Not the host", body = crate::error::ErrorBody)
    )
)]
pub async fn end_selecting(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
) -> Result<Json<SelectionClosedResponse>, AppError> {
    Ok(Json(
        session_service::force_end_selecting(&state, id, player).await?,
    ))
}

/// Vote for a submission; a new vote replaces the previous one.
#[utoipa::path(
    post,
    path = "/sessions/{id}/votes",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote recorded", body = SessionView),
        (status = 404, description = "Unknown submission", body = crate::error::ErrorBody),
        (status = 422, description = "Pass or disallowed self-vote", body = crate::error::ErrorBody)
    )
)]
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
    Valid(Json(payload)): Valid<Json<VoteRequest>>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(
        session_service::cast_vote(&state, id, player, payload.submission_id).await?,
    ))
}

/// Host closes the voting and scores the round.
#[utoipa::path(
    post,
    path = "/sessions/{id}/voting/end",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    responses(
        (status = 200, description = "Round scored", body = VotingClosedResponse),
        (status = 403, description = "Not the host", body = crate::error::ErrorBody)
    )
)]
pub async fn end_voting(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
) -> Result<Json<VotingClosedResponse>, AppError> {
    Ok(Json(
        session_service::force_end_voting(&state, id, player).await?,
    ))
}

/// Host opens the next round with the whole roster.
#[utoipa::path(
    post,
    path = "/sessions/{id}/rounds/next",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    request_body = RoundStartRequest,
    responses(
        (status = 200, description = "Next round opened", body = SessionView),
        (status = 409, description = "Results are not shown", body = crate::error::ErrorBody)
    )
)]
pub async fn next_round(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
    Valid(Json(payload)): Valid<Json<RoundStartRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let prompt = payload.prompt.map(Into::into);
    Ok(Json(
        session_service::next_round(&state, id, player, prompt).await?,
    ))
}

/// Host ends the game.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    responses(
        (status = 200, description = "Game ended", body = GameEndedResponse),
        (status = 403, description = "Not the host", body = crate::error::ErrorBody)
    )
)]
pub async fn end_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
) -> Result<Json<GameEndedResponse>, AppError> {
    Ok(Json(session_service::end_game(&state, id, player).await?))
}

/// Host starts a countdown that forces the phase to close at its deadline.
#[utoipa::path(
    post,
    path = "/sessions/{id}/countdown",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    request_body = CountdownRequest,
    responses(
        (status = 200, description = "Countdown running", body = SessionView),
        (status = 409, description = "Countdown kind does not match the phase", body = crate::error::ErrorBody)
    )
)]
pub async fn start_countdown(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
    Valid(Json(payload)): Valid<Json<CountdownRequest>>,
) -> Result<Json<SessionView>, AppError> {
    let session = session_service::start_countdown(
        &state,
        id,
        player,
        payload.kind,
        payload.message,
        payload.duration_seconds.map(Duration::from_secs),
    )
    .await?;
    Ok(Json(session))
}

/// Host cancels the running countdown.
#[utoipa::path(
    delete,
    path = "/sessions/{id}/countdown",
    tag = "sessions",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Player-Id" = Uuid, Header, description = "Acting player")
    ),
    responses(
        (status = 200, description = "Countdown cancelled", body = SessionView),
        (status = 403, description = "Not the host", body = crate::error::ErrorBody)
    )
)]
pub async fn cancel_countdown(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ActingPlayer(player): ActingPlayer,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(
        session_service::cancel_countdown(&state, id, player).await?,
    ))
}
