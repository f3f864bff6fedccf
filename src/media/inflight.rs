//! Process-local registry collapsing concurrent lookups of the same `(track, preference)`.
//!
//! Entries are pruned whenever the registry is touched; there is no background sweeper. The
//! registry only deduplicates within one process.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tokio::{task::AbortHandle, time::Instant};
use tracing::{debug, warn};

use crate::{
    dao::models::MediaPreference,
    media::cache::{MediaLookup, UnavailableReason},
};

/// Lookup result shared by every caller that joined the same resolution.
pub type SharedLookup = Shared<BoxFuture<'static, MediaLookup>>;

type SlotKey = (String, MediaPreference);

enum Slot {
    Pending {
        lookup: SharedLookup,
        task: AbortHandle,
        started_at: Instant,
        token: u64,
    },
    Suppressed {
        until: Instant,
    },
}

/// State of a key as seen by a caller.
pub enum InFlight {
    /// A resolution is running (or was just started); await it.
    Pending(SharedLookup),
    /// The provider quota is known to be exhausted for this key.
    Suppressed,
}

/// Registry of running lookups and quota suppressions.
pub struct InFlightRegistry {
    entries: DashMap<SlotKey, Slot>,
    ttl: Duration,
    suppression: Duration,
    next_token: AtomicU64,
}

impl InFlightRegistry {
    /// `ttl` is the age after which a still-running lookup is treated as wedged and replaced;
    /// `suppression` is the quota backoff.
    pub fn new(ttl: Duration, suppression: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            ttl,
            suppression,
            next_token: AtomicU64::new(0),
        })
    }

    /// Live entry for the key, if any.
    pub fn peek(&self, track_key: &str, preference: MediaPreference) -> Option<InFlight> {
        let now = Instant::now();
        self.prune(now);
        let slot = self.entries.get(&(track_key.to_owned(), preference))?;
        self.live(slot.value(), now)
    }

    /// Join a live entry or start a new lookup with `start`.
    ///
    /// The started future runs as a detached task that settles its own entry when it completes,
    /// whether or not any caller is still waiting: quota exhaustion turns it into a suppression
    /// window, anything else removes it. Until then the entry stays joinable.
    pub fn claim<F>(
        self: &Arc<Self>,
        track_key: &str,
        preference: MediaPreference,
        start: F,
    ) -> InFlight
    where
        F: FnOnce() -> BoxFuture<'static, MediaLookup>,
    {
        let now = Instant::now();
        self.prune(now);
        let key = (track_key.to_owned(), preference);

        let entry = self.entries.entry(key.clone());
        if let Entry::Occupied(ref occupied) = entry {
            if let Some(live) = self.live(occupied.get(), now) {
                return live;
            }
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);
        let work = start();
        let task = tokio::spawn(async move {
            let outcome = work.await;
            registry.settle(key, token, &outcome);
            outcome
        });
        let abort = task.abort_handle();
        let lookup = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(error = %err, "media lookup task failed");
                    MediaLookup::TemporarilyUnavailable(UnavailableReason::ProviderError)
                }
            }
        }
        .boxed()
        .shared();

        entry.insert(Slot::Pending {
            lookup: lookup.clone(),
            task: abort,
            started_at: now,
            token,
        });
        debug!(track_key, ?preference, "lookup started");
        InFlight::Pending(lookup)
    }

    /// Number of live entries (pending and suppressed).
    pub fn len(&self) -> usize {
        self.prune(Instant::now());
        self.entries.len()
    }

    /// Whether no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, slot: &Slot, now: Instant) -> Option<InFlight> {
        match slot {
            Slot::Pending { lookup, .. } if self.running(slot, now) => {
                Some(InFlight::Pending(lookup.clone()))
            }
            Slot::Suppressed { until } if now < *until => Some(InFlight::Suppressed),
            _ => None,
        }
    }

    fn running(&self, slot: &Slot, now: Instant) -> bool {
        match slot {
            Slot::Pending {
                task, started_at, ..
            } => !task.is_finished() && now.duration_since(*started_at) < self.ttl,
            Slot::Suppressed { .. } => false,
        }
    }

    fn prune(&self, now: Instant) {
        self.entries.retain(|_, slot| {
            let slot: &Slot = slot;
            match slot {
                Slot::Pending { task, .. } => {
                    let keep = self.running(slot, now);
                    if !keep {
                        task.abort();
                    }
                    keep
                }
                Slot::Suppressed { until } => now < *until,
            }
        });
    }

    fn settle(&self, key: SlotKey, token: u64, outcome: &MediaLookup) {
        let Entry::Occupied(mut occupied) = self.entries.entry(key) else {
            return;
        };
        // A newer lookup may have replaced a wedged one; leave it alone.
        if !matches!(occupied.get(), Slot::Pending { token: current, .. } if *current == token) {
            return;
        }

        if outcome.is_quota_exhausted() {
            occupied.insert(Slot::Suppressed {
                until: Instant::now() + self.suppression,
            });
        } else {
            occupied.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn registry() -> Arc<InFlightRegistry> {
        InFlightRegistry::new(Duration::from_secs(30), Duration::from_secs(300))
    }

    async fn wait(state: InFlight) -> MediaLookup {
        match state {
            InFlight::Pending(lookup) => lookup.await,
            InFlight::Suppressed => MediaLookup::TemporarilyUnavailable(UnavailableReason::QuotaExceeded),
        }
    }

    #[tokio::test]
    async fn concurrent_claims_share_one_lookup() {
        let registry = registry();
        let starts = Arc::new(AtomicUsize::new(0));

        let make = |starts: Arc<AtomicUsize>| {
            move || -> BoxFuture<'static, MediaLookup> {
                starts.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {
                    tokio::task::yield_now().await;
                    MediaLookup::NotFound
                })
            }
        };

        let first = registry.claim("k", MediaPreference::Audio, make(starts.clone()));
        let second = registry.claim("k", MediaPreference::Audio, make(starts.clone()));
        let other_pref = registry.claim("k", MediaPreference::Video, make(starts.clone()));

        assert_eq!(wait(first).await, MediaLookup::NotFound);
        assert_eq!(wait(second).await, MediaLookup::NotFound);
        assert_eq!(wait(other_pref).await, MediaLookup::NotFound);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_suppresses_for_backoff_window() {
        let registry = registry();
        let state = registry.claim("k", MediaPreference::Video, || {
            Box::pin(async {
                MediaLookup::TemporarilyUnavailable(UnavailableReason::QuotaExceeded)
            })
        });
        wait(state).await;

        assert!(matches!(
            registry.peek("k", MediaPreference::Video),
            Some(InFlight::Suppressed)
        ));
        assert!(registry.peek("k", MediaPreference::Audio).is_none());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(registry.peek("k", MediaPreference::Video).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_lookups_still_settle() {
        let registry = registry();
        let started = registry.claim("k", MediaPreference::Audio, || {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                MediaLookup::NotFound
            })
        });
        drop(started);
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pending_entries_are_replaced() {
        let registry = registry();
        let _abandoned = registry.claim("k", MediaPreference::Audio, || {
            Box::pin(futures::future::pending::<MediaLookup>())
        });
        assert_eq!(registry.len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(registry.peek("k", MediaPreference::Audio).is_none());

        let fresh = registry.claim("k", MediaPreference::Audio, || {
            Box::pin(async { MediaLookup::NotFound })
        });
        assert_eq!(wait(fresh).await, MediaLookup::NotFound);
    }
}
