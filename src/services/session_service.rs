use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::session::{
        GameEndedResponse, RoundResultView, SelectionClosedResponse, SessionView,
        SubmissionResponse, VotingClosedResponse,
    },
    error::ServiceError,
    state::{
        SharedState,
        prompts::Prompt,
        session::{Countdown, CountdownKind, GameError, GameSession, PlayerId, SubmissionContent},
    },
};

/// Letters used for join codes; `I` and `O` are left out to avoid confusion with digits.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const CODE_LENGTH: usize = 6;
const MAX_CODE_ATTEMPTS: usize = 10;
/// Margin added to a countdown timer so the persisted deadline has passed when it fires.
const COUNTDOWN_SLACK: Duration = Duration::from_millis(50);

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn view(session: &GameSession) -> SessionView {
    SessionView::project(session, SystemTime::now())
}

/// Open a session hosted by `host`, retrying on join code collisions.
pub async fn create_session(
    state: &SharedState,
    host: PlayerId,
    host_name: String,
) -> Result<SessionView, ServiceError> {
    let store = state.require_store().await?;

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let session = GameSession::new(
            generate_code(),
            host,
            host_name.trim().to_owned(),
            SystemTime::now(),
        );
        match store.insert_session(session.clone().into()).await {
            Ok(()) => {
                info!(session_id = %session.id, code = %session.code, "session created");
                return Ok(view(&session));
            }
            Err(err) if err.is_conflict() => {
                warn!(attempt, code = %session.code, "join code collision; retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(
        "could not allocate a unique join code".into(),
    ))
}

/// Join a session by code. Joining twice returns the session unchanged.
pub async fn join_session(
    state: &SharedState,
    code: &str,
    player: PlayerId,
    name: String,
) -> Result<SessionView, ServiceError> {
    let session = find_by_code(state, code).await?;
    let name = name.trim().to_owned();

    match state
        .run_session_transition(session.id, |session, now| {
            session.join(player, name.clone(), now)
        })
        .await
    {
        Ok(((), session)) => {
            info!(session_id = %session.id, player_id = %player, "player joined");
            Ok(view(&session))
        }
        Err(ServiceError::Game(GameError::AlreadyActed { .. })) => {
            Ok(view(&state.load_session(session.id).await?))
        }
        Err(err) => Err(err),
    }
}

async fn find_by_code(state: &SharedState, code: &str) -> Result<GameSession, ServiceError> {
    let store = state.require_store().await?;
    let code = code.trim().to_uppercase();
    let Some(entity) = store.find_session_by_code(code.clone()).await? else {
        return Err(ServiceError::NotFound(format!("session with code `{code}` not found")));
    };
    Ok(entity.into())
}

/// Current projection of a session.
pub async fn get_session(state: &SharedState, id: Uuid) -> Result<SessionView, ServiceError> {
    Ok(view(&state.load_session(id).await?))
}

/// Current projection of a session looked up by code.
pub async fn get_session_by_code(
    state: &SharedState,
    code: &str,
) -> Result<SessionView, ServiceError> {
    let session = find_by_code(state, code).await?;
    get_session(state, session.id).await
}

/// Flip the player's ready flag.
pub async fn toggle_ready(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
) -> Result<SessionView, ServiceError> {
    let prompts = state.prompts();
    let (_, session) = state
        .run_session_transition(id, |session, now| {
            session.toggle_ready(player, prompts.as_ref(), now)
        })
        .await?;
    Ok(view(&session))
}

/// Host starts the first round with whoever is ready.
pub async fn force_start(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
    prompt: Option<Prompt>,
) -> Result<SessionView, ServiceError> {
    let prompts = state.prompts();
    let (_, session) = state
        .run_session_transition(id, |session, now| {
            session.force_start(player, prompt.clone(), prompts.as_ref(), now)
        })
        .await?;
    Ok(view(&session))
}

/// Accept a song or a pass for the current round.
pub async fn submit(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
    content: SubmissionContent,
) -> Result<SubmissionResponse, ServiceError> {
    let (submission_id, session) = state
        .run_session_transition(id, |session, now| session.submit(player, content.clone(), now))
        .await?;
    Ok(SubmissionResponse {
        submission_id,
        session: view(&session),
    })
}

/// Host closes the selection, synthesizing passes.
pub async fn force_end_selecting(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
) -> Result<SelectionClosedResponse, ServiceError> {
    let (forced_passes, session) = state
        .run_session_transition(id, |session, now| session.force_end_selecting(player, now))
        .await?;
    Ok(SelectionClosedResponse {
        forced_passes,
        session: view(&session),
    })
}

/// Vote for a submission.
pub async fn cast_vote(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
    submission_id: Uuid,
) -> Result<SessionView, ServiceError> {
    let (_, session) = state
        .run_session_transition(id, |session, now| {
            session.cast_vote(player, submission_id, now)
        })
        .await?;
    Ok(view(&session))
}

/// Host closes the voting and scores the round.
pub async fn force_end_voting(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
) -> Result<VotingClosedResponse, ServiceError> {
    let (result, session) = state
        .run_session_transition(id, |session, now| session.force_end_voting(player, now))
        .await?;
    Ok(VotingClosedResponse {
        result: RoundResultView::from(&result),
        session: view(&session),
    })
}

/// Host opens the next round; the whole current roster takes part.
pub async fn next_round(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
    prompt: Option<Prompt>,
) -> Result<SessionView, ServiceError> {
    let prompts = state.prompts();
    let (_, session) = state
        .run_session_transition(id, |session, now| {
            session.next_round(player, prompt.clone(), prompts.as_ref(), now)?;
            session.lock_in_roster()
        })
        .await?;
    Ok(view(&session))
}

/// Host ends the game.
pub async fn end_game(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
) -> Result<GameEndedResponse, ServiceError> {
    let retention = state.config().retention();
    let (final_round, session) = state
        .run_session_transition(id, |session, now| session.end_game(player, retention, now))
        .await?;
    Ok(GameEndedResponse {
        final_round: final_round.as_ref().map(RoundResultView::from),
        session: view(&session),
    })
}

/// Host starts a forced-advance countdown and arms its timer.
pub async fn start_countdown(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
    kind: CountdownKind,
    message: Option<String>,
    duration: Option<Duration>,
) -> Result<SessionView, ServiceError> {
    let duration = duration.unwrap_or_else(|| state.config().countdown());
    let message = message.unwrap_or_default();
    let (countdown, session) = state
        .run_session_transition(id, |session, now| {
            session.start_countdown(player, kind, message.clone(), duration, now)
        })
        .await?;

    arm_countdown(state.clone(), id, &countdown);
    Ok(view(&session))
}

/// Host cancels the countdown.
pub async fn cancel_countdown(
    state: &SharedState,
    id: Uuid,
    player: PlayerId,
) -> Result<SessionView, ServiceError> {
    let (_, session) = state
        .run_session_transition(id, |session, _| session.cancel_countdown(player))
        .await?;
    Ok(view(&session))
}

/// Apply the countdown once its deadline passes.
///
/// The session is reconciled on every read too, so a lost timer (restart, other instance)
/// only delays the forced advance until the next access.
fn arm_countdown(state: SharedState, id: Uuid, countdown: &Countdown) {
    let delay = countdown.remaining(SystemTime::now()) + COUNTDOWN_SLACK;
    tokio::spawn(async move {
        sleep(delay).await;
        match state.run_session_transition(id, |_, _| Ok(())).await {
            Ok(((), session)) => {
                info!(session_id = %id, phase = ?session.phase, "countdown timer fired");
            }
            Err(err) => warn!(session_id = %id, error = %err, "countdown timer failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::game_store::{GameStore, memory::MemoryGameStore},
        providers::{
            ProviderResult, TrackSearchItem, TrackSearchProvider, VideoSearchItem,
            VideoSearchProvider,
        },
        state::{AppState, Providers, session::SongChoice, state_machine::GamePhase},
    };

    struct Silent;

    impl VideoSearchProvider for Silent {
        fn search(
            &self,
            _query: String,
            _category: Option<&'static str>,
            _max_results: u32,
        ) -> BoxFuture<'static, ProviderResult<Vec<VideoSearchItem>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    impl TrackSearchProvider for Silent {
        fn search(
            &self,
            _query: String,
            _limit: u32,
        ) -> BoxFuture<'static, ProviderResult<Vec<TrackSearchItem>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    async fn app() -> SharedState {
        let state = AppState::new(
            AppConfig::default(),
            Providers {
                video: Arc::new(Silent),
                tracks: Arc::new(Silent),
            },
            None,
        );
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
        state.set_game_store(store).await;
        state
    }

    fn song(name: &str) -> SubmissionContent {
        SubmissionContent::Song(SongChoice {
            song_id: name.to_lowercase(),
            song_name: name.into(),
            artist: "Artist".into(),
            album_cover: None,
        })
    }

    #[test]
    fn codes_use_the_unambiguous_alphabet() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn join_is_idempotent_and_case_insensitive() {
        let state = app().await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let created = create_session(&state, host, "Host".into()).await.unwrap();

        let joined = join_session(&state, &created.code.to_lowercase(), guest, "Guest".into())
            .await
            .unwrap();
        assert_eq!(joined.players.len(), 2);

        let again = join_session(&state, &created.code, guest, "Guest".into())
            .await
            .unwrap();
        assert_eq!(again.players.len(), 2);
        assert_eq!(again.version, joined.version);

        let missing = join_session(&state, "ZZZZZZ", guest, "Guest".into()).await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn next_round_locks_in_late_joiners() {
        let state = app().await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let late = Uuid::new_v4();
        let session = create_session(&state, host, "Host".into()).await.unwrap();
        join_session(&state, &session.code, guest, "Guest".into())
            .await
            .unwrap();

        toggle_ready(&state, session.id, guest).await.unwrap();
        join_session(&state, &session.code, late, "Late".into())
            .await
            .unwrap();

        submit(&state, session.id, host, song("A")).await.unwrap();
        let voting = submit(&state, session.id, guest, SubmissionContent::Pass)
            .await
            .unwrap();
        assert_eq!(voting.session.phase, GamePhase::Voting);

        force_end_voting(&state, session.id, host).await.unwrap();
        let next = next_round(&state, session.id, host, None).await.unwrap();

        assert_eq!(next.phase, GamePhase::Selecting);
        assert_eq!(next.round, 2);
        assert!(next.players.iter().all(|player| player.active));
        assert_ne!(next.prompt, voting.session.prompt);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_closes_score_the_round_once() {
        let state = app().await;
        let host = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let session = create_session(&state, host, "Host".into()).await.unwrap();
        let id = session.id;
        for (player, name) in [(alice, "Alice"), (bob, "Bob")] {
            join_session(&state, &session.code, player, name.into())
                .await
                .unwrap();
        }
        toggle_ready(&state, id, alice).await.unwrap();
        toggle_ready(&state, id, bob).await.unwrap();

        let host_song = submit(&state, id, host, song("A")).await.unwrap().submission_id;
        let alice_song = submit(&state, id, alice, song("B")).await.unwrap().submission_id;
        let voting = submit(&state, id, bob, song("C")).await.unwrap();
        assert_eq!(voting.session.phase, GamePhase::Voting);
        assert!(voting.session.players.iter().all(|player| player.active));
        let before = cast_vote(&state, id, alice, host_song).await.unwrap();

        let mut closes = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            closes.push(tokio::spawn(async move {
                force_end_voting(&state, id, host).await
            }));
        }
        let late_vote = {
            let state = state.clone();
            tokio::spawn(async move { cast_vote(&state, id, bob, alice_song).await })
        };

        let mut closed = 0;
        for close in closes {
            match close.await.unwrap() {
                Ok(_) => closed += 1,
                Err(err) => assert!(matches!(
                    err,
                    ServiceError::Game(GameError::InvalidPhase { .. })
                )),
            }
        }
        let vote_landed = late_vote.await.unwrap().is_ok();
        assert_eq!(closed, 1);

        let store = state.require_store().await.unwrap();
        let stored: GameSession = store.find_session(id).await.unwrap().unwrap().into();
        assert_eq!(stored.phase, GamePhase::Results);

        let result = stored.last_round.as_ref().unwrap();
        let scored: u32 = stored.roster.iter().map(|player| player.score).sum();
        let previous: u32 = before.players.iter().map(|player| player.score).sum();
        assert_eq!(scored - previous, result.total_points());
        assert_eq!(
            stored.version,
            before.version + 1 + u64::from(vote_landed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_timer_forces_the_phase() {
        let state = app().await;
        let host = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let session = create_session(&state, host, "Host".into()).await.unwrap();
        join_session(&state, &session.code, guest, "Guest".into())
            .await
            .unwrap();
        toggle_ready(&state, session.id, guest).await.unwrap();

        start_countdown(
            &state,
            session.id,
            host,
            CountdownKind::Selecting,
            Some("Last call".into()),
            Some(Duration::ZERO),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        let store = state.require_store().await.unwrap();
        let stored: GameSession = store.find_session(session.id).await.unwrap().unwrap().into();
        assert_eq!(stored.phase, GamePhase::Voting);
        assert_eq!(stored.forced_passes.len(), 2);
        assert!(stored.countdown.is_none());
    }
}
