pub mod prompts;
pub mod session;
pub mod state_machine;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{game_store::GameStore, models::SessionEntity},
    error::ServiceError,
    media::MediaCache,
    providers::{TrackSearchProvider, VideoSearchProvider},
    state::{
        prompts::PromptSource,
        session::{GameError, GameSession},
    },
};

/// Application state shared across handlers and background tasks.
pub type SharedState = Arc<AppState>;
/// Upper bound on one session transition, retries included.
const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
/// Read-modify-write cycles attempted before giving up on a contended session.
const MAX_TRANSITION_ATTEMPTS: usize = 5;

/// External search providers wired into the application.
pub struct Providers {
    /// Video search used by the media cache.
    pub video: Arc<dyn VideoSearchProvider>,
    /// Track search used by the song search endpoint.
    pub tracks: Arc<dyn TrackSearchProvider>,
}

/// Central application state storing the storage handle, caches and configuration.
pub struct AppState {
    game_store: RwLock<Option<Arc<dyn GameStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    session_gates: DashMap<Uuid, Arc<Mutex<()>>>,
    media: MediaCache,
    track_search: Arc<dyn TrackSearchProvider>,
    maintenance_token: Option<String>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(
        config: AppConfig,
        providers: Providers,
        maintenance_token: Option<String>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let media = MediaCache::new(providers.video, config.media());
        Arc::new(Self {
            game_store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            session_gates: DashMap::new(),
            media,
            track_search: providers.tracks,
            maintenance_token: maintenance_token.filter(|token| !token.is_empty()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    /// Obtain a handle to the current game store, if one is installed.
    pub async fn game_store(&self) -> Option<Arc<dyn GameStore>> {
        let guard = self.game_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn GameStore>, ServiceError> {
        if *self.degraded.borrow() {
            return Err(ServiceError::Degraded);
        }
        self.game_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new game store implementation and leave degraded mode.
    pub async fn set_game_store(&self, store: Arc<dyn GameStore>) {
        {
            let mut guard = self.game_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.game_store.read().await;
        guard.is_none() || *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            info!(degraded = value, "degraded mode changed");
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Prompt supply for new rounds.
    pub fn prompts(&self) -> Arc<dyn PromptSource> {
        self.config.prompts()
    }

    /// Media lookup cache.
    pub fn media(&self) -> &MediaCache {
        &self.media
    }

    /// Track search provider.
    pub fn track_search(&self) -> Arc<dyn TrackSearchProvider> {
        self.track_search.clone()
    }

    /// Token expected on maintenance endpoints; `None` disables them.
    pub fn maintenance_token(&self) -> Option<&str> {
        self.maintenance_token.as_deref()
    }

    fn session_gate(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.session_gates
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_session_gate(&self, session_id: Uuid) {
        self.session_gates
            .remove_if(&session_id, |_, gate| Arc::strong_count(gate) == 1);
    }

    /// Run one serialized read-modify-write cycle on a session.
    ///
    /// An expired countdown is applied before `action` runs. `action` mutates a copy of the
    /// stored session; nothing is written when it fails unless the countdown changed the
    /// session, and nothing is written when the copy is unchanged. Writes are optimistic:
    /// a version conflict reloads the session and replays `action`.
    pub async fn run_session_transition<T, F>(
        &self,
        session_id: Uuid,
        mut action: F,
    ) -> Result<(T, GameSession), ServiceError>
    where
        F: FnMut(&mut GameSession, SystemTime) -> Result<T, GameError>,
    {
        let store = self.require_store().await?;
        let gate = self.session_gate(session_id);
        let guard = gate.lock().await;

        let work = transact(store.as_ref(), session_id, &mut action);

        let result = match self.transition_timeout {
            Some(limit) => timeout(limit, work)
                .await
                .unwrap_or(Err(ServiceError::Timeout)),
            None => work.await,
        };

        drop(guard);
        drop(gate);
        self.release_session_gate(session_id);
        result
    }

    /// Load a session, applying an expired countdown first.
    pub async fn load_session(&self, session_id: Uuid) -> Result<GameSession, ServiceError> {
        let store = self.require_store().await?;
        let session: GameSession = store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))?
            .into();

        if session.countdown_due(SystemTime::now()) {
            let ((), session) = self.run_session_transition(session_id, |_, _| Ok(())).await?;
            return Ok(session);
        }
        Ok(session)
    }
}

/// One attempt loop of [`AppState::run_session_transition`], without the gate and timeout.
async fn transact<T, F>(
    store: &dyn GameStore,
    session_id: Uuid,
    action: &mut F,
) -> Result<(T, GameSession), ServiceError>
where
    F: FnMut(&mut GameSession, SystemTime) -> Result<T, GameError>,
{
    for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
        let stored: GameSession = store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session {session_id}")))?
            .into();
        let now = SystemTime::now();
        let mut next = stored.clone();
        let reconciled = next.reconcile_countdown(now);
        if let Some(kind) = reconciled {
            info!(session_id = %session_id, ?kind, "countdown expired; phase forced");
        }

        let outcome = action(&mut next, now);
        if next == stored {
            return outcome.map(|value| (value, next)).map_err(ServiceError::from);
        }

        next.version = stored.version + 1;
        next.updated_at = now;
        match store
            .save_session(SessionEntity::from(next.clone()), stored.version)
            .await
        {
            Ok(()) => {
                debug!(
                    session_id = %session_id,
                    version = next.version,
                    phase = ?next.phase,
                    "session saved"
                );
                return outcome.map(|value| (value, next)).map_err(ServiceError::from);
            }
            Err(err) if err.is_conflict() => {
                warn!(
                    session_id = %session_id,
                    attempt,
                    "session changed concurrently; retrying"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::Conflict(format!("session {session_id}")))
}
