use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// High-level phases a session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Lobby: players join and toggle their ready flag.
    Waiting,
    /// Active participants pick a song (or pass) for the current prompt.
    Selecting,
    /// Active participants vote on the real submissions.
    Voting,
    /// Round scores are displayed; the host picks the next step.
    Results,
    /// Terminal phase, the session only awaits retention cleanup.
    Ended,
}

/// Indicates why a selecting or voting phase was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Every active participant acted.
    Completed,
    /// The host (or an expired countdown) forced the phase to end.
    Forced,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// A round starts from the lobby (everyone ready or host force start).
    RoundStarted,
    /// The selecting phase is closed and voting opens.
    SelectionClosed(CloseReason),
    /// Voting is closed and the round gets scored.
    VotingClosed(CloseReason),
    /// The host opens the next round from the results screen.
    NextRound,
    /// The host ends the game.
    EndGame,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the invalid event was received.
    pub from: GamePhase,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

impl GamePhase {
    /// Compute the phase reached by applying `event`, if the transition is valid.
    ///
    /// Transitions are strictly forward except `Results -> Selecting` (next round) and any
    /// non-terminal phase `-> Ended`.
    pub fn next(self, event: GameEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self, event) {
            (GamePhase::Waiting, GameEvent::RoundStarted) => GamePhase::Selecting,
            (GamePhase::Selecting, GameEvent::SelectionClosed(_)) => GamePhase::Voting,
            (GamePhase::Voting, GameEvent::VotingClosed(_)) => GamePhase::Results,
            (GamePhase::Results, GameEvent::NextRound) => GamePhase::Selecting,
            (from, GameEvent::EndGame) if from != GamePhase::Ended => GamePhase::Ended,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }

    /// Whether the phase accepts no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, GamePhase::Ended)
    }
}
