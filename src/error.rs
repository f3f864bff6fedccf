use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{dao::storage::StorageError, providers::ProviderError, state::session::GameError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The game rules rejected the action.
    #[error(transparent)]
    Game(#[from] GameError),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Concurrent writers kept winning the optimistic check.
    #[error("conflict: {0}")]
    Conflict(String),
    /// An external provider failed.
    #[error("provider failure")]
    Provider(#[source] ProviderError),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { entity } => ServiceError::Conflict(entity),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        ServiceError::Provider(err)
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Game rule violation, mapped per kind.
    #[error("{0}")]
    Game(GameError),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded; the client may retry.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Game(game) => AppError::Game(game),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Conflict(message) => AppError::Conflict(message),
            ServiceError::Provider(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

/// Error payload returned by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine readable error kind.
    pub code: &'static str,
    /// Human readable description.
    pub message: String,
    /// Whether retrying the same request later may succeed.
    pub retryable: bool,
}

fn game_status(err: &GameError) -> (StatusCode, &'static str) {
    match err {
        GameError::PermissionDenied { .. } => (StatusCode::FORBIDDEN, "permission_denied"),
        GameError::UnknownPlayer { .. } => (StatusCode::FORBIDDEN, "unknown_player"),
        GameError::NotAParticipant { .. } => (StatusCode::FORBIDDEN, "not_a_participant"),
        GameError::InvalidPhase { .. } => (StatusCode::CONFLICT, "invalid_phase"),
        GameError::Transition(_) => (StatusCode::CONFLICT, "invalid_transition"),
        GameError::AlreadyActed { .. } => (StatusCode::CONFLICT, "already_acted"),
        GameError::InsufficientPlayers { .. } => (StatusCode::CONFLICT, "insufficient_players"),
        GameError::SubmissionNotFound { .. } => (StatusCode::NOT_FOUND, "submission_not_found"),
        GameError::PassNotVotable => (StatusCode::UNPROCESSABLE_ENTITY, "pass_not_votable"),
        GameError::SelfVoteNotAllowed { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "self_vote_not_allowed")
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Game(err) => game_status(err),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
        };

        let payload = Json(ErrorBody {
            code,
            message: self.to_string(),
            retryable: matches!(
                self,
                AppError::ServiceUnavailable(_) | AppError::Conflict(_)
            ),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::GamePhase;

    #[test]
    fn game_errors_map_to_distinct_statuses() {
        let forbidden = AppError::from(ServiceError::from(GameError::PermissionDenied {
            action: "end the game",
        }))
        .into_response();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let phase = AppError::Game(GameError::InvalidPhase {
            action: "vote",
            phase: GamePhase::Selecting,
        })
        .into_response();
        assert_eq!(phase.status(), StatusCode::CONFLICT);

        let pass = AppError::Game(GameError::PassNotVotable).into_response();
        assert_eq!(pass.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn storage_conflicts_stay_conflicts() {
        let err = ServiceError::from(StorageError::conflict("session"));
        assert!(matches!(err, ServiceError::Conflict(_)));
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
