use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        format_system_time,
        validation::{validate_not_blank, validate_session_code},
    },
    state::{
        prompts::Prompt,
        session::{
            Countdown, CountdownKind, GameSession, RankedSubmission, RoundResult, SongChoice,
            Submission, SubmissionContent,
        },
        state_machine::{CloseReason, GamePhase},
    },
};

/// Payload used to open a new session; the caller becomes the host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Display name of the host.
    #[validate(length(min = 1, max = 32), custom(function = "validate_not_blank"))]
    pub host_name: String,
}

/// Payload used to join a session by its code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    /// Six-character session code, case-insensitive.
    #[validate(custom(function = "validate_session_code"))]
    pub code: String,
    /// Display name of the joining player.
    #[validate(length(min = 1, max = 32), custom(function = "validate_not_blank"))]
    pub name: String,
}

/// Prompt chosen by the host instead of drawing from the bank.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PromptInput {
    /// Prompt text shown to players.
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub text: String,
    /// Optional category label.
    #[validate(length(max = 40))]
    pub category: Option<String>,
}

impl From<PromptInput> for Prompt {
    fn from(input: PromptInput) -> Self {
        Prompt::custom(&input.text, input.category.as_deref())
    }
}

/// Optional explicit prompt for starting a round.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct RoundStartRequest {
    /// Explicit prompt; the bank is drawn from when absent.
    #[serde(default)]
    #[validate(nested)]
    pub prompt: Option<PromptInput>,
}

/// Song handed in for the current prompt.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmissionRequest {
    /// Track identifier from the song search.
    #[validate(length(min = 1, max = 64))]
    pub song_id: String,
    /// Track title.
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub song_name: String,
    /// Track artist.
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub artist: String,
    /// Album art URL.
    #[validate(url)]
    pub album_cover: Option<String>,
}

impl From<SubmissionRequest> for SubmissionContent {
    fn from(request: SubmissionRequest) -> Self {
        SubmissionContent::Song(SongChoice {
            song_id: request.song_id,
            song_name: request.song_name.trim().to_owned(),
            artist: request.artist.trim().to_owned(),
            album_cover: request.album_cover,
        })
    }
}

/// Vote for a submission of the current round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VoteRequest {
    /// Submission voted for.
    pub submission_id: Uuid,
}

/// Start a forced-advance countdown.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CountdownRequest {
    /// Phase the countdown closes.
    pub kind: CountdownKind,
    /// Message displayed alongside the timer.
    #[serde(default)]
    #[validate(length(max = 140))]
    pub message: Option<String>,
    /// Defaults to the configured countdown duration.
    #[serde(default)]
    #[validate(range(min = 1, max = 600))]
    pub duration_seconds: Option<u64>,
}

/// Roster entry as shown to clients.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct PlayerView {
    /// Player identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Readiness flag used in the lobby.
    pub ready: bool,
    /// Cumulative score.
    pub score: u32,
    /// Whether the player is locked into the current round.
    pub active: bool,
}

/// Song details of a submission.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SongView {
    /// Track identifier.
    pub song_id: String,
    /// Track title.
    pub song_name: String,
    /// Track artist.
    pub artist: String,
    /// Album art URL.
    pub album_cover: Option<String>,
}

impl From<&SongChoice> for SongView {
    fn from(song: &SongChoice) -> Self {
        Self {
            song_id: song.song_id.clone(),
            song_name: song.song_name.clone(),
            artist: song.artist.clone(),
            album_cover: song.album_cover.clone(),
        }
    }
}

/// Submission of the current round.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SubmissionView {
    /// Submission identifier.
    pub id: Uuid,
    /// Submitting player.
    pub player_id: Uuid,
    /// Whether the player passed instead of choosing a song.
    pub is_pass: bool,
    /// Hidden while the selection is still open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<SongView>,
    /// RFC 3339 submission time.
    pub submitted_at: String,
    /// Whether this was the first song handed in.
    pub got_speed_bonus: bool,
    /// Votes received so far.
    pub votes: usize,
}

impl SubmissionView {
    fn project(submission: &Submission, reveal: bool) -> Self {
        let song = match (&submission.content, reveal) {
            (SubmissionContent::Song(song), true) => Some(SongView::from(song)),
            _ => None,
        };
        Self {
            id: submission.id,
            player_id: submission.player_id,
            is_pass: submission.is_pass(),
            song,
            submitted_at: format_system_time(submission.submitted_at),
            got_speed_bonus: submission.got_speed_bonus,
            votes: submission.votes.len(),
        }
    }
}

/// Countdown with its computed deadline.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct CountdownView {
    /// Phase the countdown closes.
    pub kind: CountdownKind,
    /// Message displayed alongside the timer.
    pub message: String,
    /// RFC 3339 start time.
    pub started_at: String,
    /// Total duration.
    pub duration_seconds: u64,
    /// RFC 3339 time at which the phase is force-closed.
    pub deadline: String,
    /// Seconds left at projection time.
    pub remaining_seconds: u64,
}

impl CountdownView {
    fn project(countdown: &Countdown, now: SystemTime) -> Self {
        Self {
            kind: countdown.kind,
            message: countdown.message.clone(),
            started_at: format_system_time(countdown.started_at),
            duration_seconds: countdown.duration_seconds,
            deadline: format_system_time(countdown.deadline()),
            remaining_seconds: countdown.remaining(now).as_secs(),
        }
    }
}

/// Score line of a closed round.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct RankedSubmissionView {
    /// Ranked submission.
    pub submission_id: Uuid,
    /// Author of the submission.
    pub player_id: Uuid,
    /// Track title.
    pub song_name: String,
    /// Track artist.
    pub artist: String,
    /// Votes received.
    pub votes: u32,
    /// Whether the speed bonus was earned.
    pub speed_bonus: bool,
    /// Points credited, bonus included.
    pub points: u32,
}

impl From<&RankedSubmission> for RankedSubmissionView {
    fn from(entry: &RankedSubmission) -> Self {
        Self {
            submission_id: entry.submission_id,
            player_id: entry.player_id,
            song_name: entry.song_name.clone(),
            artist: entry.artist.clone(),
            votes: entry.votes,
            speed_bonus: entry.speed_bonus,
            points: entry.points,
        }
    }
}

/// Points credited to one player by a round.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct PointsAwarded {
    /// Credited player.
    pub player_id: Uuid,
    /// Points added to the score.
    pub points: u32,
}

/// Outcome of a closed voting phase.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct RoundResultView {
    /// Closed round number.
    pub round: u32,
    /// Submissions ordered by votes.
    pub rankings: Vec<RankedSubmissionView>,
    /// Submissions sharing the top vote count.
    pub winners: Vec<Uuid>,
    /// Whether more than one submission won.
    pub is_tie: bool,
    /// Points credited per player.
    pub points_awarded: Vec<PointsAwarded>,
    /// Active players who did not vote.
    pub non_voters: Vec<Uuid>,
    /// Players recorded as passing when the selection was forced closed.
    pub forced_passes: Vec<Uuid>,
    /// What closed the voting.
    pub closed_by: CloseReason,
}

impl From<&RoundResult> for RoundResultView {
    fn from(result: &RoundResult) -> Self {
        Self {
            round: result.round,
            rankings: result.rankings.iter().map(Into::into).collect(),
            winners: result.winners.clone(),
            is_tie: result.is_tie,
            points_awarded: result
                .rankings
                .iter()
                .map(|entry| PointsAwarded {
                    player_id: entry.player_id,
                    points: entry.points,
                })
                .collect(),
            non_voters: result.non_voters.clone(),
            forced_passes: result.forced_passes.clone(),
            closed_by: result.closed_by,
        }
    }
}

/// Archived round summary.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct RoundSummary {
    /// Round number.
    pub round: u32,
    /// Prompt of the round.
    pub prompt: Option<Prompt>,
    /// Number of submissions.
    pub submissions: usize,
    /// Winning submissions.
    pub winners: Vec<Uuid>,
}

/// Client-facing projection of a session.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionView {
    /// Session identifier.
    pub id: Uuid,
    /// Join code.
    pub code: String,
    /// Current phase.
    pub phase: GamePhase,
    /// Host player.
    pub host_id: Uuid,
    /// Current round number, zero before the first round.
    pub round: u32,
    /// Roster in join order.
    pub players: Vec<PlayerView>,
    /// Prompt of the current round.
    pub prompt: Option<Prompt>,
    /// Submissions of the current round.
    pub submissions: Vec<SubmissionView>,
    /// Whether players may vote for their own song this round.
    pub self_vote_allowed: bool,
    /// Running countdown, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<CountdownView>,
    /// Result of the latest closed round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_round: Option<RoundResultView>,
    /// Archived rounds, oldest first.
    pub previous_rounds: Vec<RoundSummary>,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// RFC 3339 end time once the game is over.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// RFC 3339 time after which an ended session is purged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl SessionView {
    /// Project a session as seen at `now`.
    pub fn project(session: &GameSession, now: SystemTime) -> Self {
        let reveal = session.phase != GamePhase::Selecting;
        Self {
            id: session.id,
            code: session.code.clone(),
            phase: session.phase,
            host_id: session.host_id,
            round: session.round_number,
            players: session
                .roster
                .iter()
                .map(|player| PlayerView {
                    id: player.id,
                    name: player.name.clone(),
                    ready: player.ready,
                    score: player.score,
                    active: session.active_participants.contains(&player.id),
                })
                .collect(),
            prompt: session.current_prompt.clone(),
            submissions: session
                .submissions
                .iter()
                .map(|submission| SubmissionView::project(submission, reveal))
                .collect(),
            self_vote_allowed: session.self_vote_allowed(),
            countdown: session
                .countdown
                .as_ref()
                .map(|countdown| CountdownView::project(countdown, now)),
            last_round: session.last_round.as_ref().map(Into::into),
            previous_rounds: session
                .previous_rounds
                .iter()
                .map(|record| RoundSummary {
                    round: record.round,
                    prompt: record.prompt.clone(),
                    submissions: record.submissions.len(),
                    winners: record
                        .result
                        .as_ref()
                        .map(|result| result.winners.clone())
                        .unwrap_or_default(),
                })
                .collect(),
            created_at: format_system_time(session.created_at),
            ended_at: session.ended_at.map(format_system_time),
            expires_at: session.expires_at.map(format_system_time),
            version: session.version,
        }
    }
}

/// Result of a submission or pass.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionResponse {
    /// Recorded submission.
    pub submission_id: Uuid,
    /// Session after the submission.
    pub session: SessionView,
}

/// Result of a forced end of the selection.
#[derive(Debug, Serialize, ToSchema)]
pub struct SelectionClosedResponse {
    /// Players recorded as passing.
    pub forced_passes: Vec<Uuid>,
    /// Session after the selection closed.
    pub session: SessionView,
}

/// Result of a forced end of the voting.
#[derive(Debug, Serialize, ToSchema)]
pub struct VotingClosedResponse {
    /// Scored round.
    pub result: RoundResultView,
    /// Session after the voting closed.
    pub session: SessionView,
}

/// Result of ending the game.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameEndedResponse {
    /// Result of the round closed by ending the game, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_round: Option<RoundResultView>,
    /// Ended session.
    pub session: SessionView,
}
