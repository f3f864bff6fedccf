use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{game_store::GameStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

fn backoff(delay: Duration) -> Duration {
    (delay * 2).min(MAX_DELAY)
}

/// Keep a session store attached to the shared state.
///
/// Connects with exponential backoff, then polls the store's health. A failed check flips the
/// service into degraded mode until the store recovers or a fresh connection is made.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn GameStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_game_store(store.clone()).await;
                info!("session store attached");
                delay = INITIAL_DELAY;

                watch(&state, store.as_ref()).await;
                warn!("session store lost; reconnecting from scratch");
            }
            Err(err) => {
                warn!(error = %err, retry_in = ?delay, "session store connection failed");
                state.update_degraded(true).await;
            }
        }
        sleep(delay).await;
        delay = backoff(delay);
    }
}

/// Poll `store` until it fails and cannot be recovered in place.
async fn watch(state: &SharedState, store: &dyn GameStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    state.update_degraded(false).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "session store health check failed; entering degraded mode");
                state.update_degraded(true).await;
                if !recover(store).await {
                    return;
                }
                state.update_degraded(false).await;
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn recover(store: &dyn GameStore) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "session store reconnected");
                return true;
            }
            Err(err) => {
                warn!(attempt, error = %err, "session store reconnect attempt failed");
                sleep(delay).await;
                delay = backoff(delay);
            }
        }
    }
    warn!("exhausted session store reconnect attempts");
    false
}
