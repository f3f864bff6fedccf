use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::state::SharedState;

/// Periodically evict stale media cache entries using the configured policy.
///
/// Ticks are skipped while storage is degraded.
pub async fn run(state: SharedState, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first sweep waits a full period.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        sweep(&state).await;
    }
}

async fn sweep(state: &SharedState) {
    let store = match state.require_store().await {
        Ok(store) => store,
        Err(err) => {
            debug!(error = %err, "skipping media cache sweep");
            return;
        }
    };

    let policy = &state.config().media().eviction;
    match state.media().evict(store, policy, SystemTime::now()).await {
        Ok(report) if report.deleted > 0 => info!(
            examined = report.examined,
            idle = report.idle,
            unpopular = report.unpopular,
            overflow = report.overflow,
            deleted = report.deleted,
            "media cache sweep removed entries"
        ),
        Ok(report) => debug!(examined = report.examined, "media cache sweep found nothing to remove"),
        Err(err) => warn!(error = %err, "media cache sweep failed"),
    }
}
