//! Authoritative aggregate for one game session and the rules applied to it.
//!
//! Every operation validates phase, role and membership before touching any field, so a
//! rejected action never leaves the aggregate partially mutated. Callers are expected to
//! serialise mutations of a given session (see [`crate::state::AppState`]).

use std::{
    mem,
    time::{Duration, SystemTime},
};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::state::{
    prompts::{Prompt, PromptSource},
    state_machine::{CloseReason, GameEvent, GamePhase, InvalidTransition},
};

/// Identifier of a player, issued by the identity layer.
pub type PlayerId = Uuid;

/// Minimum roster size required to start a round.
pub const MIN_PLAYERS: usize = 2;
/// Self-voting is allowed while fewer active participants than this take part.
pub const SMALL_GROUP_LIMIT: usize = 3;

/// Rule violations reported by the session aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// A host-only action was attempted by another player.
    #[error("only the host can {action}")]
    PermissionDenied {
        /// Human readable action name.
        action: &'static str,
    },
    /// The action is not valid in the current phase.
    #[error("cannot {action} while the session is in the {phase:?} phase")]
    InvalidPhase {
        /// Human readable action name.
        action: &'static str,
        /// Phase the session was in.
        phase: GamePhase,
    },
    /// The actor is not on the roster at all.
    #[error("player `{player}` is not part of this session")]
    UnknownPlayer {
        /// Acting player.
        player: PlayerId,
    },
    /// The actor is on the roster but was not locked into the current round.
    #[error("player `{player}` is not an active participant of the current round")]
    NotAParticipant {
        /// Acting player.
        player: PlayerId,
    },
    /// The player already performed this (idempotent) action.
    #[error("player `{player}` already joined this session")]
    AlreadyActed {
        /// Acting player.
        player: PlayerId,
    },
    /// Not enough players to start a round.
    #[error("at least {required} players are required, the session has {actual}")]
    InsufficientPlayers {
        /// Required roster size.
        required: usize,
        /// Current roster size.
        actual: usize,
    },
    /// The targeted submission does not exist in the current round.
    #[error("submission `{id}` not found in the current round")]
    SubmissionNotFound {
        /// Requested submission.
        id: Uuid,
    },
    /// Votes cannot target a pass.
    #[error("a pass cannot receive votes")]
    PassNotVotable,
    /// Self-voting outside the small-group exception.
    #[error("self-voting is only allowed when fewer than {limit} players are active")]
    SelfVoteNotAllowed {
        /// Active participant threshold.
        limit: usize,
    },
    /// Transition table rejected the event.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Readiness flag used in the lobby.
    pub ready: bool,
    /// Cumulative score over all rounds.
    pub score: u32,
    /// When the player joined the session.
    pub joined_at: SystemTime,
}

/// Song picked by a player for the current prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongChoice {
    /// Identifier from the track search provider.
    pub song_id: String,
    /// Track title.
    pub song_name: String,
    /// Performing artist.
    pub artist: String,
    /// Album artwork URL, if known.
    pub album_cover: Option<String>,
}

/// What a player handed in for the round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionContent {
    /// A real answer.
    Song(SongChoice),
    /// The player declined to answer (or was forced to pass).
    Pass,
}

impl SubmissionContent {
    /// Whether this is a pass.
    pub fn is_pass(&self) -> bool {
        matches!(self, SubmissionContent::Pass)
    }
}

/// One player's entry for the current round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Submission identifier, stable across re-submissions by the same player.
    pub id: Uuid,
    /// Author.
    pub player_id: PlayerId,
    /// Song or pass.
    pub content: SubmissionContent,
    /// Acceptance time of the latest version.
    pub submitted_at: SystemTime,
    /// Whether this submission earned the speed bonus.
    pub got_speed_bonus: bool,
    /// Players who voted for this submission.
    pub votes: IndexSet<PlayerId>,
}

impl Submission {
    /// Whether this submission is a pass.
    pub fn is_pass(&self) -> bool {
        self.content.is_pass()
    }
}

/// Which phase a countdown force-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CountdownKind {
    /// Force-end the selecting phase.
    Selecting,
    /// Force-end the voting phase.
    Voting,
}

impl CountdownKind {
    /// Phase in which this countdown is valid.
    pub fn phase(self) -> GamePhase {
        match self {
            CountdownKind::Selecting => GamePhase::Selecting,
            CountdownKind::Voting => GamePhase::Voting,
        }
    }
}

/// Shared advisory timer; the persisted deadline is what triggers the forced advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    /// Phase being counted down.
    pub kind: CountdownKind,
    /// Message displayed to players.
    pub message: String,
    /// Start time.
    pub started_at: SystemTime,
    /// Total duration.
    pub duration_seconds: u64,
}

impl Countdown {
    /// Instant after which the forced advance runs.
    pub fn deadline(&self) -> SystemTime {
        self.started_at + Duration::from_secs(self.duration_seconds)
    }

    /// Time left before the deadline, zero once expired.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.deadline().duration_since(now).unwrap_or_default()
    }

    /// Whether the deadline has passed.
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.deadline() <= now
    }
}

/// Score line for one real submission of a closed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedSubmission {
    /// Submission identifier.
    pub submission_id: Uuid,
    /// Author.
    pub player_id: PlayerId,
    /// Track title.
    pub song_name: String,
    /// Performing artist.
    pub artist: String,
    /// Number of votes received.
    pub votes: u32,
    /// Whether the speed bonus applied.
    pub speed_bonus: bool,
    /// Points awarded for the round.
    pub points: u32,
}

/// Outcome of a closed voting phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// 1-based round number.
    pub round: u32,
    /// Real submissions ordered by votes, descending. Ties keep submission order.
    pub rankings: Vec<RankedSubmission>,
    /// Submissions sharing the top vote count.
    pub winners: Vec<Uuid>,
    /// Whether more than one submission shares the top vote count.
    pub is_tie: bool,
    /// Active participants that never voted.
    pub non_voters: Vec<PlayerId>,
    /// Active participants whose pass was synthesized when selection was forced.
    pub forced_passes: Vec<PlayerId>,
    /// How voting ended.
    pub closed_by: CloseReason,
}

impl RoundResult {
    fn tally(
        round: u32,
        submissions: &[Submission],
        non_voters: Vec<PlayerId>,
        forced_passes: Vec<PlayerId>,
        closed_by: CloseReason,
    ) -> Self {
        let mut rankings = submissions
            .iter()
            .filter_map(|submission| match &submission.content {
                SubmissionContent::Song(song) => {
                    let votes = submission.votes.len() as u32;
                    let bonus = u32::from(submission.got_speed_bonus);
                    Some(RankedSubmission {
                        submission_id: submission.id,
                        player_id: submission.player_id,
                        song_name: song.song_name.clone(),
                        artist: song.artist.clone(),
                        votes,
                        speed_bonus: submission.got_speed_bonus,
                        points: votes + bonus,
                    })
                }
                SubmissionContent::Pass => None,
            })
            .collect::<Vec<_>>();
        rankings.sort_by(|a, b| b.votes.cmp(&a.votes));

        let winners = match rankings.first() {
            Some(top) => rankings
                .iter()
                .take_while(|entry| entry.votes == top.votes)
                .map(|entry| entry.submission_id)
                .collect::<Vec<_>>(),
            None => Vec::new(),
        };

        Self {
            round,
            is_tie: winners.len() > 1,
            rankings,
            winners,
            non_voters,
            forced_passes,
            closed_by,
        }
    }

    /// Total points distributed by this round.
    pub fn total_points(&self) -> u32 {
        self.rankings.iter().map(|entry| entry.points).sum()
    }
}

/// Archived round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round number.
    pub round: u32,
    /// Prompt answered in the round.
    pub prompt: Option<Prompt>,
    /// Submissions as they stood when the round was archived.
    pub submissions: Vec<Submission>,
    /// Scoring outcome, when voting was closed.
    pub result: Option<RoundResult>,
}

/// Aggregated state of one game.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSession {
    /// Primary key.
    pub id: Uuid,
    /// Short join code.
    pub code: String,
    /// Current phase.
    pub phase: GamePhase,
    /// Host player; only the host may force-advance or choose prompts.
    pub host_id: PlayerId,
    /// Ordered roster, unique by player id.
    pub roster: Vec<Player>,
    /// Players locked into the current round.
    pub active_participants: IndexSet<PlayerId>,
    /// Prompt of the current round.
    pub current_prompt: Option<Prompt>,
    /// Submissions of the current round.
    pub submissions: Vec<Submission>,
    /// Archived rounds, oldest first.
    pub previous_rounds: Vec<RoundRecord>,
    /// Active forced-advance countdown.
    pub countdown: Option<Countdown>,
    /// Current round number (0 before the first round).
    pub round_number: u32,
    /// Whether the speed bonus of the current round has been claimed.
    pub speed_bonus_claimed: bool,
    /// Players whose pass was synthesized when the current selection was forced.
    pub forced_passes: Vec<PlayerId>,
    /// Result of the most recently closed voting phase.
    pub last_round: Option<RoundResult>,
    /// Prompt ids already used in this session.
    pub used_prompt_ids: Vec<String>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last successful mutation.
    pub updated_at: SystemTime,
    /// When the game ended.
    pub ended_at: Option<SystemTime>,
    /// Retention horizon after which the session may be purged.
    pub expires_at: Option<SystemTime>,
    /// Optimistic concurrency counter, bumped on every persisted mutation.
    pub version: u64,
}

impl GameSession {
    /// Create a session in the lobby with the host as sole player.
    pub fn new(code: String, host_id: PlayerId, host_name: String, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            code,
            phase: GamePhase::Waiting,
            host_id,
            roster: vec![Player {
                id: host_id,
                name: host_name,
                ready: false,
                score: 0,
                joined_at: now,
            }],
            active_participants: IndexSet::new(),
            current_prompt: None,
            submissions: Vec::new(),
            previous_rounds: Vec::new(),
            countdown: None,
            round_number: 0,
            speed_bonus_claimed: false,
            forced_passes: Vec::new(),
            last_round: None,
            used_prompt_ids: Vec::new(),
            created_at: now,
            updated_at: now,
            ended_at: None,
            expires_at: None,
            version: 0,
        }
    }

    /// Look up a roster entry.
    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.roster.iter().find(|player| player.id == id)
    }

    fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.roster.iter_mut().find(|player| player.id == id)
    }

    /// Whether the given player hosts the session.
    pub fn is_host(&self, id: PlayerId) -> bool {
        self.host_id == id
    }

    /// Whether self-votes are accepted in the current round.
    pub fn self_vote_allowed(&self) -> bool {
        self.active_participants.len() < SMALL_GROUP_LIMIT
    }

    /// Total number of votes cast in the current round.
    pub fn total_votes(&self) -> usize {
        self.submissions
            .iter()
            .map(|submission| submission.votes.len())
            .sum()
    }

    /// Number of submissions that can receive votes.
    pub fn votable_submissions(&self) -> usize {
        self.submissions
            .iter()
            .filter(|submission| !submission.is_pass())
            .count()
    }

    /// Whether a countdown deadline has passed and a reconciliation is pending.
    pub fn countdown_due(&self, now: SystemTime) -> bool {
        self.countdown
            .as_ref()
            .is_some_and(|countdown| countdown.is_due(now))
    }

    // -----------------------------------------------------------------------
    // Lobby
    // -----------------------------------------------------------------------

    /// Add a player to the roster. Late joiners are not active until the next round.
    pub fn join(&mut self, player: PlayerId, name: String, now: SystemTime) -> Result<(), GameError> {
        if self.phase.is_terminal() {
            return Err(GameError::InvalidPhase {
                action: "join",
                phase: self.phase,
            });
        }
        if self.player(player).is_some() {
            return Err(GameError::AlreadyActed { player });
        }

        self.roster.push(Player {
            id: player,
            name,
            ready: false,
            score: 0,
            joined_at: now,
        });
        Ok(())
    }

    /// Flip a player's ready flag; starts the round once every non-host player is ready.
    pub fn toggle_ready(
        &mut self,
        player: PlayerId,
        prompts: &dyn PromptSource,
        now: SystemTime,
    ) -> Result<GamePhase, GameError> {
        self.ensure_phase(GamePhase::Waiting, "toggle ready")?;
        let host_id = self.host_id;
        let entry = self
            .player_mut(player)
            .ok_or(GameError::UnknownPlayer { player })?;
        entry.ready = !entry.ready;

        let everyone_ready = self.roster.len() >= MIN_PLAYERS
            && self
                .roster
                .iter()
                .filter(|candidate| candidate.id != host_id)
                .all(|candidate| candidate.ready);

        if everyone_ready {
            let prompt = prompts.draw_unused(&self.used_prompt_ids);
            let active = self.roster.iter().map(|p| p.id).collect();
            self.start_round(active, prompt, now)?;
        }

        Ok(self.phase)
    }

    /// Host starts the round with whoever is ready.
    pub fn force_start(
        &mut self,
        actor: PlayerId,
        prompt: Option<Prompt>,
        prompts: &dyn PromptSource,
        now: SystemTime,
    ) -> Result<GamePhase, GameError> {
        self.ensure_phase(GamePhase::Waiting, "start the game")?;
        self.ensure_host(actor, "start the game")?;
        if self.roster.len() < MIN_PLAYERS {
            return Err(GameError::InsufficientPlayers {
                required: MIN_PLAYERS,
                actual: self.roster.len(),
            });
        }

        let prompt = prompt.unwrap_or_else(|| prompts.draw_unused(&self.used_prompt_ids));
        if let Some(host) = self.player_mut(actor) {
            host.ready = true;
        }
        let active = self
            .roster
            .iter()
            .filter(|player| player.ready)
            .map(|player| player.id)
            .collect();
        self.start_round(active, prompt, now)?;

        Ok(self.phase)
    }

    fn start_round(
        &mut self,
        active: IndexSet<PlayerId>,
        prompt: Prompt,
        now: SystemTime,
    ) -> Result<(), GameError> {
        let next = self.phase.next(GameEvent::RoundStarted)?;
        self.begin_round(active, prompt);
        self.phase = next;
        info!(
            session_id = %self.id,
            round = self.round_number,
            active = self.active_participants.len(),
            at = ?now,
            "round started"
        );
        Ok(())
    }

    fn begin_round(&mut self, active: IndexSet<PlayerId>, prompt: Prompt) {
        if !self.used_prompt_ids.contains(&prompt.id) {
            self.used_prompt_ids.push(prompt.id.clone());
        }
        self.current_prompt = Some(prompt);
        self.active_participants = active;
        self.submissions.clear();
        self.round_number += 1;
        self.speed_bonus_claimed = false;
        self.forced_passes.clear();
        self.countdown = None;
    }

    // -----------------------------------------------------------------------
    // Selecting
    // -----------------------------------------------------------------------

    /// Accept (or replace) a player's submission; closes selection once everyone answered.
    ///
    /// Returns the submission identifier.
    pub fn submit(
        &mut self,
        actor: PlayerId,
        content: SubmissionContent,
        now: SystemTime,
    ) -> Result<Uuid, GameError> {
        self.ensure_phase(GamePhase::Selecting, "submit a song")?;
        self.ensure_active(actor)?;

        let is_real = !content.is_pass();
        let existing = self
            .submissions
            .iter()
            .position(|submission| submission.player_id == actor);
        let kept_bonus = existing.is_some_and(|index| self.submissions[index].got_speed_bonus);
        let got_speed_bonus = is_real && (kept_bonus || !self.speed_bonus_claimed);
        if got_speed_bonus {
            self.speed_bonus_claimed = true;
        }

        let id = match existing {
            Some(index) => {
                let submission = &mut self.submissions[index];
                submission.content = content;
                submission.submitted_at = now;
                submission.got_speed_bonus = got_speed_bonus;
                submission.votes.clear();
                submission.id
            }
            None => {
                let id = Uuid::new_v4();
                self.submissions.push(Submission {
                    id,
                    player_id: actor,
                    content,
                    submitted_at: now,
                    got_speed_bonus,
                    votes: IndexSet::new(),
                });
                id
            }
        };

        if self.submissions.len() >= self.active_participants.len() {
            self.close_selection(CloseReason::Completed, now)?;
        }

        Ok(id)
    }

    /// Host closes selection, synthesizing passes for missing players.
    ///
    /// Returns the players that received a synthesized pass.
    pub fn force_end_selecting(
        &mut self,
        actor: PlayerId,
        now: SystemTime,
    ) -> Result<Vec<PlayerId>, GameError> {
        self.ensure_phase(GamePhase::Selecting, "end the selection")?;
        self.ensure_host(actor, "end the selection")?;
        self.close_selection(CloseReason::Forced, now)
    }

    fn close_selection(
        &mut self,
        reason: CloseReason,
        now: SystemTime,
    ) -> Result<Vec<PlayerId>, GameError> {
        let next = self.phase.next(GameEvent::SelectionClosed(reason))?;

        let missing = self
            .active_participants
            .iter()
            .filter(|id| {
                !self
                    .submissions
                    .iter()
                    .any(|submission| submission.player_id == **id)
            })
            .copied()
            .collect::<Vec<_>>();

        for player_id in &missing {
            self.submissions.push(Submission {
                id: Uuid::new_v4(),
                player_id: *player_id,
                content: SubmissionContent::Pass,
                submitted_at: now,
                got_speed_bonus: false,
                votes: IndexSet::new(),
            });
        }

        self.forced_passes = missing.clone();
        self.phase = next;
        self.countdown = None;

        info!(
            session_id = %self.id,
            round = self.round_number,
            reason = ?reason,
            forced_passes = ?missing,
            votable = self.votable_submissions(),
            "selection closed"
        );
        Ok(missing)
    }

    /// Lock the whole roster into a round opened without an active set.
    pub fn lock_in_roster(&mut self) -> Result<(), GameError> {
        self.ensure_phase(GamePhase::Selecting, "lock in participants")?;
        if self.active_participants.is_empty() {
            self.active_participants = self.roster.iter().map(|player| player.id).collect();
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Voting
    // -----------------------------------------------------------------------

    /// Record a vote; a new vote supersedes the player's previous one.
    pub fn cast_vote(
        &mut self,
        actor: PlayerId,
        submission_id: Uuid,
        now: SystemTime,
    ) -> Result<GamePhase, GameError> {
        self.ensure_phase(GamePhase::Voting, "vote")?;
        self.ensure_active(actor)?;

        let target = self
            .submissions
            .iter()
            .position(|submission| submission.id == submission_id)
            .ok_or(GameError::SubmissionNotFound { id: submission_id })?;
        if self.submissions[target].is_pass() {
            return Err(GameError::PassNotVotable);
        }
        if self.submissions[target].player_id == actor && !self.self_vote_allowed() {
            return Err(GameError::SelfVoteNotAllowed {
                limit: SMALL_GROUP_LIMIT,
            });
        }
        if self.submissions[target].votes.contains(&actor) {
            return Ok(self.phase);
        }

        for submission in self.submissions.iter_mut() {
            submission.votes.shift_remove(&actor);
        }
        self.submissions[target].votes.insert(actor);

        if self.total_votes() >= self.active_participants.len() {
            self.close_voting(CloseReason::Completed, now)?;
        }

        Ok(self.phase)
    }

    /// Host closes voting and scores the round.
    pub fn force_end_voting(
        &mut self,
        actor: PlayerId,
        now: SystemTime,
    ) -> Result<RoundResult, GameError> {
        self.ensure_phase(GamePhase::Voting, "end the voting")?;
        self.ensure_host(actor, "end the voting")?;
        self.close_voting(CloseReason::Forced, now)
    }

    /// Score the round. The Voting -> Results transition guards against double application.
    fn close_voting(
        &mut self,
        reason: CloseReason,
        now: SystemTime,
    ) -> Result<RoundResult, GameError> {
        let next = self.phase.next(GameEvent::VotingClosed(reason))?;

        let non_voters = self
            .active_participants
            .iter()
            .filter(|id| {
                !self
                    .submissions
                    .iter()
                    .any(|submission| submission.votes.contains(*id))
            })
            .copied()
            .collect::<Vec<_>>();

        let result = RoundResult::tally(
            self.round_number,
            &self.submissions,
            non_voters,
            self.forced_passes.clone(),
            reason,
        );

        for entry in &result.rankings {
            if let Some(player) = self.player_mut(entry.player_id) {
                player.score += entry.points;
            }
        }

        self.phase = next;
        self.countdown = None;
        self.last_round = Some(result.clone());

        info!(
            session_id = %self.id,
            round = result.round,
            reason = ?reason,
            points = result.total_points(),
            non_voters = ?result.non_voters,
            tie = result.is_tie,
            at = ?now,
            "voting closed"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Archive the round and open the next one.
    ///
    /// The active set is cleared; the caller decides how it is repopulated (see
    /// [`GameSession::lock_in_roster`]).
    pub fn next_round(
        &mut self,
        actor: PlayerId,
        prompt: Option<Prompt>,
        prompts: &dyn PromptSource,
        now: SystemTime,
    ) -> Result<GamePhase, GameError> {
        self.ensure_phase(GamePhase::Results, "start the next round")?;
        self.ensure_host(actor, "start the next round")?;
        let next = self.phase.next(GameEvent::NextRound)?;

        self.archive_current_round();
        for player in self.roster.iter_mut() {
            player.ready = false;
        }
        let prompt = prompt.unwrap_or_else(|| prompts.draw_unused(&self.used_prompt_ids));
        self.begin_round(IndexSet::new(), prompt);
        self.phase = next;

        info!(
            session_id = %self.id,
            round = self.round_number,
            at = ?now,
            "next round opened"
        );
        Ok(self.phase)
    }

    /// End the game and return the final round's result.
    pub fn end_game(
        &mut self,
        actor: PlayerId,
        retention: Duration,
        now: SystemTime,
    ) -> Result<Option<RoundResult>, GameError> {
        if self.phase.is_terminal() {
            return Err(GameError::InvalidPhase {
                action: "end the game",
                phase: self.phase,
            });
        }
        self.ensure_host(actor, "end the game")?;
        let next = self.phase.next(GameEvent::EndGame)?;

        if self.phase == GamePhase::Results {
            self.archive_current_round();
        }
        self.phase = next;
        self.countdown = None;
        self.ended_at = Some(now);
        self.expires_at = Some(now + retention);

        info!(session_id = %self.id, rounds = self.round_number, "game ended");
        Ok(self.last_round.clone())
    }

    fn archive_current_round(&mut self) {
        if self.current_prompt.is_none() && self.submissions.is_empty() {
            return;
        }
        let result = self
            .last_round
            .as_ref()
            .filter(|result| result.round == self.round_number)
            .cloned();
        self.previous_rounds.push(RoundRecord {
            round: self.round_number,
            prompt: self.current_prompt.take(),
            submissions: mem::take(&mut self.submissions),
            result,
        });
    }

    // -----------------------------------------------------------------------
    // Countdown
    // -----------------------------------------------------------------------

    /// Start an advisory countdown that force-ends the current phase at its deadline.
    pub fn start_countdown(
        &mut self,
        actor: PlayerId,
        kind: CountdownKind,
        message: String,
        duration: Duration,
        now: SystemTime,
    ) -> Result<Countdown, GameError> {
        self.ensure_phase(kind.phase(), "start a countdown")?;
        self.ensure_host(actor, "start a countdown")?;

        let countdown = Countdown {
            kind,
            message,
            started_at: now,
            duration_seconds: duration.as_secs(),
        };
        self.countdown = Some(countdown.clone());
        Ok(countdown)
    }

    /// Clear the countdown without any other side effect.
    pub fn cancel_countdown(&mut self, actor: PlayerId) -> Result<(), GameError> {
        self.ensure_host(actor, "cancel the countdown")?;
        self.countdown = None;
        Ok(())
    }

    /// Apply an expired countdown.
    ///
    /// Runs the forced advance only when the session is still in the countdown's phase.
    /// Returns the kind of forced advance that was applied, if any.
    pub fn reconcile_countdown(&mut self, now: SystemTime) -> Option<CountdownKind> {
        let countdown = self.countdown.as_ref()?;
        if !countdown.is_due(now) {
            return None;
        }
        let kind = countdown.kind;
        self.countdown = None;

        if self.phase != kind.phase() {
            return None;
        }

        let applied = match kind {
            CountdownKind::Selecting => self.close_selection(CloseReason::Forced, now).is_ok(),
            CountdownKind::Voting => self.close_voting(CloseReason::Forced, now).is_ok(),
        };
        applied.then_some(kind)
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    fn ensure_phase(&self, expected: GamePhase, action: &'static str) -> Result<(), GameError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(GameError::InvalidPhase {
                action,
                phase: self.phase,
            })
        }
    }

    fn ensure_host(&self, actor: PlayerId, action: &'static str) -> Result<(), GameError> {
        if self.is_host(actor) {
            Ok(())
        } else {
            Err(GameError::PermissionDenied { action })
        }
    }

    fn ensure_active(&self, actor: PlayerId) -> Result<(), GameError> {
        if self.player(actor).is_none() {
            return Err(GameError::UnknownPlayer { player: actor });
        }
        if !self.active_participants.contains(&actor) {
            return Err(GameError::NotAParticipant { player: actor });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPrompts;

    impl PromptSource for FixedPrompts {
        fn draw_unused(&self, used: &[String]) -> Prompt {
            let id = format!("p{}", used.len());
            Prompt {
                text: format!("Prompt {id}"),
                id,
                category: "test".into(),
            }
        }
    }

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn song(name: &str) -> SubmissionContent {
        SubmissionContent::Song(SongChoice {
            song_id: format!("id-{name}"),
            song_name: name.into(),
            artist: "Artist".into(),
            album_cover: None,
        })
    }

    /// Session with `n` players, host first.
    fn lobby(n: usize) -> (GameSession, Vec<PlayerId>) {
        let host = Uuid::new_v4();
        let mut session = GameSession::new("ABCDEF".into(), host, "host".into(), t(0));
        let mut ids = vec![host];
        for index in 1..n {
            let id = Uuid::new_v4();
            session.join(id, format!("player{index}"), t(0)).unwrap();
            ids.push(id);
        }
        (session, ids)
    }

    fn started(n: usize) -> (GameSession, Vec<PlayerId>) {
        let (mut session, ids) = lobby(n);
        for id in ids.iter().skip(1) {
            session.toggle_ready(*id, &FixedPrompts, t(1)).unwrap();
        }
        assert_eq!(session.phase, GamePhase::Selecting);
        (session, ids)
    }

    fn submission_of(session: &GameSession, player: PlayerId) -> Uuid {
        session
            .submissions
            .iter()
            .find(|s| s.player_id == player)
            .map(|s| s.id)
            .unwrap()
    }

    fn scores(session: &GameSession) -> u32 {
        session.roster.iter().map(|p| p.score).sum()
    }

    #[test]
    fn all_ready_starts_round_with_full_roster() {
        let (mut session, ids) = lobby(3);
        assert_eq!(
            session.toggle_ready(ids[1], &FixedPrompts, t(1)).unwrap(),
            GamePhase::Waiting
        );
        assert_eq!(
            session.toggle_ready(ids[2], &FixedPrompts, t(2)).unwrap(),
            GamePhase::Selecting
        );

        assert_eq!(session.active_participants.len(), 3);
        assert!(ids.iter().all(|id| session.active_participants.contains(id)));
        assert!(session.current_prompt.is_some());
        assert!(session.submissions.is_empty());
        assert_eq!(session.round_number, 1);
    }

    #[test]
    fn single_player_never_auto_starts() {
        let (mut session, ids) = lobby(1);
        session.toggle_ready(ids[0], &FixedPrompts, t(1)).unwrap();
        assert_eq!(session.phase, GamePhase::Waiting);
    }

    #[test]
    fn ready_toggle_outside_lobby_is_rejected() {
        let (mut session, ids) = started(2);
        let err = session.toggle_ready(ids[1], &FixedPrompts, t(2)).unwrap_err();
        assert!(matches!(err, GameError::InvalidPhase { .. }));
    }

    #[test]
    fn force_start_only_activates_ready_players() {
        let (mut session, ids) = lobby(3);
        session.toggle_ready(ids[1], &FixedPrompts, t(1)).unwrap();

        let explicit = Prompt::custom("Songs about trains", None);
        session
            .force_start(ids[0], Some(explicit.clone()), &FixedPrompts, t(2))
            .unwrap();

        assert_eq!(session.phase, GamePhase::Selecting);
        assert_eq!(session.current_prompt, Some(explicit));
        assert!(session.active_participants.contains(&ids[0]));
        assert!(session.active_participants.contains(&ids[1]));
        assert!(!session.active_participants.contains(&ids[2]));
        assert!(session.player(ids[0]).unwrap().ready);

        let err = session.submit(ids[2], song("late"), t(3)).unwrap_err();
        assert_eq!(err, GameError::NotAParticipant { player: ids[2] });
    }

    #[test]
    fn force_start_requires_host_and_two_players() {
        let (mut session, ids) = lobby(2);
        let err = session
            .force_start(ids[1], None, &FixedPrompts, t(1))
            .unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied { .. }));

        let (mut alone, host) = lobby(1);
        let before = alone.clone();
        let err = alone
            .force_start(host[0], None, &FixedPrompts, t(1))
            .unwrap_err();
        assert_eq!(
            err,
            GameError::InsufficientPlayers {
                required: 2,
                actual: 1
            }
        );
        assert_eq!(alone, before);
    }

    #[test]
    fn song_and_pass_complete_selection() {
        let (mut session, ids) = started(2);
        session.submit(ids[0], song("a"), t(2)).unwrap();
        assert_eq!(session.phase, GamePhase::Selecting);
        session
            .submit(ids[1], SubmissionContent::Pass, t(3))
            .unwrap();

        assert_eq!(session.phase, GamePhase::Voting);
        assert_eq!(session.votable_submissions(), 1);
        assert!(session.forced_passes.is_empty());

        let pass = submission_of(&session, ids[1]);
        let err = session.cast_vote(ids[0], pass, t(4)).unwrap_err();
        assert_eq!(err, GameError::PassNotVotable);
    }

    #[test]
    fn resubmission_overwrites_and_refreshes_timestamp() {
        let (mut session, ids) = started(3);
        let first = session.submit(ids[1], song("a"), t(2)).unwrap();
        let second = session.submit(ids[1], song("b"), t(5)).unwrap();

        assert_eq!(first, second);
        assert_eq!(session.submissions.len(), 1);
        assert_eq!(session.submissions[0].submitted_at, t(5));
        assert_eq!(session.submissions[0].content, song("b"));
        assert!(session.submissions[0].got_speed_bonus);
    }

    #[test]
    fn speed_bonus_goes_to_first_real_submission_only() {
        let (mut session, ids) = started(4);
        session
            .submit(ids[3], SubmissionContent::Pass, t(2))
            .unwrap();
        session.submit(ids[1], song("first"), t(3)).unwrap();
        session.submit(ids[2], song("second"), t(4)).unwrap();

        let bonus_holders = session
            .submissions
            .iter()
            .filter(|s| s.got_speed_bonus)
            .collect::<Vec<_>>();
        assert_eq!(bonus_holders.len(), 1);
        assert_eq!(bonus_holders[0].player_id, ids[1]);
        assert!(session.submissions.len() <= session.active_participants.len());
    }

    #[test]
    fn switching_to_pass_forfeits_bonus_without_reassigning_it() {
        let (mut session, ids) = started(3);
        session.submit(ids[1], song("first"), t(2)).unwrap();
        session
            .submit(ids[1], SubmissionContent::Pass, t(3))
            .unwrap();
        session.submit(ids[2], song("second"), t(4)).unwrap();

        assert!(session.submissions.iter().all(|s| !s.got_speed_bonus));
    }

    #[test]
    fn forced_selection_synthesizes_passes() {
        let (mut session, ids) = started(3);
        session.submit(ids[1], song("only"), t(2)).unwrap();

        let err = session.force_end_selecting(ids[1], t(3)).unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied { .. }));

        let forced = session.force_end_selecting(ids[0], t(3)).unwrap();
        assert_eq!(forced.len(), 2);
        assert!(forced.contains(&ids[0]) && forced.contains(&ids[2]));
        assert_eq!(session.phase, GamePhase::Voting);
        assert_eq!(session.votable_submissions(), 1);
        assert_eq!(session.submissions.len(), 3);
        assert!(
            session
                .submissions
                .iter()
                .filter(|s| s.is_pass())
                .all(|s| !s.got_speed_bonus)
        );
    }

    #[test]
    fn split_vote_awards_one_point_per_vote() {
        let (mut session, ids) = started(4);
        session.submit(ids[0], song("a"), t(2)).unwrap();
        session.submit(ids[1], song("b"), t(3)).unwrap();
        session.submit(ids[2], song("c"), t(4)).unwrap();
        session.submit(ids[3], song("d"), t(5)).unwrap();
        assert_eq!(session.phase, GamePhase::Voting);
        // Isolate vote points from the speed bonus.
        for submission in session.submissions.iter_mut() {
            submission.got_speed_bonus = false;
        }

        let a = submission_of(&session, ids[0]);
        let b = submission_of(&session, ids[1]);
        let c = submission_of(&session, ids[2]);
        let d = submission_of(&session, ids[3]);

        session.cast_vote(ids[1], a, t(6)).unwrap();
        session.cast_vote(ids[2], a, t(6)).unwrap();
        session.cast_vote(ids[3], b, t(7)).unwrap();
        session.cast_vote(ids[0], c, t(8)).unwrap();
        assert_eq!(session.phase, GamePhase::Results);

        let result = session.last_round.clone().unwrap();
        assert_eq!(result.rankings[0].submission_id, a);
        assert_eq!(result.rankings[0].votes, 2);
        assert_eq!(result.winners, vec![a]);
        assert!(!result.is_tie);
        assert!(result.non_voters.is_empty());
        assert!(
            result
                .rankings
                .iter()
                .any(|entry| entry.submission_id == d && entry.votes == 0)
        );
        assert_eq!(session.player(ids[0]).unwrap().score, 2);
        assert_eq!(session.player(ids[1]).unwrap().score, 1);
        assert_eq!(session.player(ids[2]).unwrap().score, 1);
        assert_eq!(session.player(ids[3]).unwrap().score, 0);
        assert_eq!(scores(&session), result.total_points());
    }

    #[test]
    fn second_vote_supersedes_the_first() {
        let (mut session, ids) = started(4);
        session.submit(ids[0], song("a"), t(2)).unwrap();
        session.submit(ids[1], song("b"), t(2)).unwrap();
        session.submit(ids[2], song("c"), t(2)).unwrap();
        session.submit(ids[3], song("d"), t(2)).unwrap();

        let a = submission_of(&session, ids[0]);
        let b = submission_of(&session, ids[1]);
        session.cast_vote(ids[3], a, t(3)).unwrap();
        session.cast_vote(ids[3], b, t(4)).unwrap();
        session.cast_vote(ids[3], b, t(5)).unwrap();

        let held = session
            .submissions
            .iter()
            .filter(|s| s.votes.contains(&ids[3]))
            .count();
        assert_eq!(held, 1);
        assert_eq!(session.total_votes(), 1);
    }

    #[test]
    fn self_vote_depends_on_active_participants_not_roster() {
        // Three on the roster, two active: small-group exception applies.
        let (mut session, ids) = lobby(3);
        session.toggle_ready(ids[1], &FixedPrompts, t(1)).unwrap();
        session.force_start(ids[0], None, &FixedPrompts, t(1)).unwrap();
        session.submit(ids[0], song("a"), t(2)).unwrap();
        session.submit(ids[1], song("b"), t(2)).unwrap();
        assert!(session.self_vote_allowed());
        let own = submission_of(&session, ids[1]);
        session.cast_vote(ids[1], own, t(3)).unwrap();

        // Three active: self-vote rejected.
        let (mut session, ids) = started(3);
        for id in &ids {
            session.submit(*id, song("x"), t(2)).unwrap();
        }
        let own = submission_of(&session, ids[2]);
        let err = session.cast_vote(ids[2], own, t(3)).unwrap_err();
        assert_eq!(err, GameError::SelfVoteNotAllowed { limit: 3 });
    }

    #[test]
    fn scoring_is_applied_once() {
        let (mut session, ids) = started(2);
        session.submit(ids[0], song("a"), t(2)).unwrap();
        session.submit(ids[1], song("b"), t(3)).unwrap();

        session.force_end_voting(ids[0], t(4)).unwrap();
        let after_first = scores(&session);
        let err = session.force_end_voting(ids[0], t(5)).unwrap_err();
        assert!(matches!(err, GameError::InvalidPhase { .. }));
        assert_eq!(scores(&session), after_first);
        // Only the speed bonus was distributed.
        assert_eq!(after_first, 1);
    }

    #[test]
    fn all_pass_round_can_be_forced_to_results() {
        let (mut session, ids) = started(2);
        session
            .submit(ids[0], SubmissionContent::Pass, t(2))
            .unwrap();
        session
            .submit(ids[1], SubmissionContent::Pass, t(2))
            .unwrap();
        assert_eq!(session.phase, GamePhase::Voting);
        assert_eq!(session.votable_submissions(), 0);

        let result = session.force_end_voting(ids[0], t(3)).unwrap();
        assert_eq!(session.phase, GamePhase::Results);
        assert!(result.rankings.is_empty());
        assert!(result.winners.is_empty());
        assert_eq!(result.non_voters.len(), 2);
        assert_eq!(scores(&session), 0);
    }

    #[test]
    fn ties_are_surfaced() {
        let (mut session, ids) = started(2);
        session.submit(ids[0], song("a"), t(2)).unwrap();
        session.submit(ids[1], song("b"), t(3)).unwrap();
        let a = submission_of(&session, ids[0]);
        let b = submission_of(&session, ids[1]);
        session.cast_vote(ids[0], b, t(4)).unwrap();
        session.cast_vote(ids[1], a, t(4)).unwrap();

        let result = session.last_round.clone().unwrap();
        assert!(result.is_tie);
        assert_eq!(result.winners.len(), 2);
    }

    #[test]
    fn next_round_archives_and_resets() {
        let (mut session, ids) = started(2);
        session.submit(ids[0], song("a"), t(2)).unwrap();
        session.submit(ids[1], song("b"), t(3)).unwrap();
        session.force_end_voting(ids[0], t(4)).unwrap();
        let first_prompt = session.current_prompt.clone();

        let err = session
            .next_round(ids[1], None, &FixedPrompts, t(5))
            .unwrap_err();
        assert!(matches!(err, GameError::PermissionDenied { .. }));

        session.next_round(ids[0], None, &FixedPrompts, t(5)).unwrap();
        assert_eq!(session.phase, GamePhase::Selecting);
        assert_eq!(session.previous_rounds.len(), 1);
        assert_eq!(session.previous_rounds[0].prompt, first_prompt);
        assert_eq!(session.previous_rounds[0].submissions.len(), 2);
        assert!(session.previous_rounds[0].result.is_some());
        assert!(session.submissions.is_empty());
        assert!(session.active_participants.is_empty());
        assert!(session.roster.iter().all(|p| !p.ready));
        assert_ne!(session.current_prompt, first_prompt);
        assert_eq!(session.round_number, 2);

        session.lock_in_roster().unwrap();
        assert_eq!(session.active_participants.len(), 2);
    }

    #[test]
    fn end_game_returns_final_round() {
        let (mut session, ids) = started(2);
        session.submit(ids[0], song("a"), t(2)).unwrap();
        session.submit(ids[1], song("b"), t(3)).unwrap();
        let b = submission_of(&session, ids[1]);
        session.cast_vote(ids[0], b, t(4)).unwrap();
        session.force_end_voting(ids[0], t(4)).unwrap();

        let retention = Duration::from_secs(7 * 24 * 3600);
        let final_round = session.end_game(ids[0], retention, t(10)).unwrap().unwrap();
        assert_eq!(final_round.winners, vec![b]);
        assert_eq!(session.phase, GamePhase::Ended);
        assert_eq!(session.ended_at, Some(t(10)));
        assert_eq!(session.expires_at, Some(t(10) + retention));
        assert_eq!(session.previous_rounds.len(), 1);

        let err = session.end_game(ids[0], retention, t(11)).unwrap_err();
        assert!(matches!(err, GameError::InvalidPhase { .. }));
    }

    #[test]
    fn rejected_actions_leave_session_untouched() {
        let (mut session, ids) = started(3);
        let outsider = Uuid::new_v4();
        let before = session.clone();

        assert!(session.cast_vote(ids[1], Uuid::new_v4(), t(2)).is_err());
        assert!(session.submit(outsider, song("x"), t(2)).is_err());
        assert!(session.force_end_selecting(ids[2], t(2)).is_err());
        assert!(
            session
                .start_countdown(ids[0], CountdownKind::Voting, "x".into(), Duration::from_secs(10), t(2))
                .is_err()
        );
        assert_eq!(session, before);
    }

    #[test]
    fn cancelled_countdown_never_forces_passes() {
        let (mut session, ids) = started(3);
        session.submit(ids[1], song("a"), t(2)).unwrap();
        session
            .start_countdown(
                ids[0],
                CountdownKind::Selecting,
                "Hurry up".into(),
                Duration::from_secs(10),
                t(10),
            )
            .unwrap();
        session.cancel_countdown(ids[0]).unwrap();

        assert_eq!(session.reconcile_countdown(t(21)), None);
        assert_eq!(session.phase, GamePhase::Selecting);
        assert!(session.submissions.iter().all(|s| !s.is_pass()));
    }

    #[test]
    fn expired_countdown_forces_the_phase_once() {
        let (mut session, ids) = started(3);
        session.submit(ids[1], song("a"), t(2)).unwrap();
        session
            .start_countdown(
                ids[0],
                CountdownKind::Selecting,
                "Hurry up".into(),
                Duration::from_secs(10),
                t(10),
            )
            .unwrap();

        assert_eq!(session.reconcile_countdown(t(15)), None);
        assert!(!session.countdown_due(t(15)));
        assert!(session.countdown_due(t(20)));
        assert_eq!(
            session.reconcile_countdown(t(20)),
            Some(CountdownKind::Selecting)
        );
        assert_eq!(session.phase, GamePhase::Voting);
        assert_eq!(session.forced_passes.len(), 2);
        assert_eq!(session.reconcile_countdown(t(30)), None);
    }

    #[test]
    fn natural_completion_suppresses_countdown() {
        let (mut session, ids) = started(2);
        session
            .start_countdown(
                ids[0],
                CountdownKind::Selecting,
                "Hurry up".into(),
                Duration::from_secs(10),
                t(10),
            )
            .unwrap();
        session.submit(ids[0], song("a"), t(11)).unwrap();
        session.submit(ids[1], song("b"), t(12)).unwrap();

        assert_eq!(session.phase, GamePhase::Voting);
        assert!(session.countdown.is_none());
        assert_eq!(session.reconcile_countdown(t(25)), None);
        assert_eq!(session.phase, GamePhase::Voting);
    }

    #[test]
    fn late_joiner_is_not_active() {
        let (mut session, ids) = started(2);
        let late = Uuid::new_v4();
        session.join(late, "late".into(), t(5)).unwrap();
        assert_eq!(
            session.join(late, "late".into(), t(6)).unwrap_err(),
            GameError::AlreadyActed { player: late }
        );
        assert!(!session.active_participants.contains(&late));
        session.submit(ids[0], song("a"), t(6)).unwrap();
        session.submit(ids[1], song("b"), t(6)).unwrap();
        assert_eq!(session.phase, GamePhase::Voting);
    }
}
