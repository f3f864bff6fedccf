//! Orchestrates a media lookup: durable cache, in-flight deduplication, provider, persistence.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    config::MediaSettings,
    dao::{
        game_store::GameStore,
        models::{MediaCacheEntity, MediaEntryUpdate, MediaPreference, MediaVariantEntity},
        storage::StorageResult,
    },
    media::{
        eviction::{self, EvictionPolicy, EvictionReport},
        inflight::{InFlight, InFlightRegistry},
        key::track_key,
        resolver::{VideoCandidate, VideoResolver},
    },
    providers::{ProviderError, VideoSearchProvider},
};

/// Why a lookup could not be answered right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// The provider quota is exhausted.
    QuotaExceeded,
    /// The provider did not answer in time.
    Timeout,
    /// The provider failed for another reason.
    ProviderError,
    /// No provider credentials are configured.
    NotConfigured,
}

impl From<&ProviderError> for UnavailableReason {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::QuotaExceeded { .. } => UnavailableReason::QuotaExceeded,
            ProviderError::Timeout { .. } => UnavailableReason::Timeout,
            ProviderError::NotConfigured { .. } => UnavailableReason::NotConfigured,
            _ => UnavailableReason::ProviderError,
        }
    }
}

/// Matched upload returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    /// Provider identifier.
    pub external_id: String,
    /// Upload title.
    pub title: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Match confidence in `[0, 1]`.
    pub confidence: f32,
    /// Whether the answer came from the durable cache.
    pub from_cache: bool,
    /// Whether the upload is video-like.
    pub is_video: bool,
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaLookup {
    /// A match is available.
    Found(ResolvedMedia),
    /// The provider has no match for this track and preference.
    NotFound,
    /// Try again later; nothing was cached.
    TemporarilyUnavailable(UnavailableReason),
}

impl MediaLookup {
    /// Whether the lookup failed because the provider quota ran out.
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(
            self,
            MediaLookup::TemporarilyUnavailable(UnavailableReason::QuotaExceeded)
        )
    }

    fn from_variant(variant: &MediaVariantEntity) -> Option<Self> {
        match variant {
            MediaVariantEntity::Resolved {
                external_id,
                title,
                thumbnail,
                confidence,
                is_video,
                ..
            } => Some(MediaLookup::Found(ResolvedMedia {
                external_id: external_id.clone(),
                title: title.clone(),
                thumbnail: thumbnail.clone(),
                confidence: *confidence,
                from_cache: true,
                is_video: *is_video,
            })),
            MediaVariantEntity::NotFound { .. } => None,
        }
    }
}

/// Resolved/not-found counts of one variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct VariantStats {
    /// Entries holding a match for this variant.
    pub resolved: usize,
    /// Entries holding a "not found" marker for this variant.
    pub not_found: usize,
}

/// Snapshot of the cache for maintenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct CacheStats {
    /// Durable entries.
    pub entries: usize,
    /// Audio variant counts.
    pub audio: VariantStats,
    /// Video variant counts.
    pub video: VariantStats,
    /// Sum of entry access counts.
    pub total_accesses: u64,
    /// Mean confidence over resolved variants.
    pub mean_confidence: Option<f32>,
    /// Live in-flight and suppression entries in this process.
    pub in_flight: usize,
}

impl CacheStats {
    fn collect(entries: &[MediaCacheEntity], in_flight: usize) -> Self {
        let mut stats = CacheStats {
            entries: entries.len(),
            in_flight,
            ..Default::default()
        };
        let mut confidence_sum = 0.0_f64;
        let mut resolved = 0_usize;

        for entry in entries {
            stats.total_accesses += entry.access_count;
            for (variant, counts) in [
                (&entry.audio, &mut stats.audio),
                (&entry.video, &mut stats.video),
            ] {
                match variant {
                    Some(MediaVariantEntity::Resolved { confidence, .. }) => {
                        counts.resolved += 1;
                        confidence_sum += f64::from(*confidence);
                        resolved += 1;
                    }
                    Some(MediaVariantEntity::NotFound { .. }) => counts.not_found += 1,
                    None => {}
                }
            }
        }

        if resolved > 0 {
            stats.mean_confidence = Some((confidence_sum / resolved as f64) as f32);
        }
        stats
    }
}

/// Entry point for media lookups and cache maintenance.
pub struct MediaCache {
    registry: Arc<InFlightRegistry>,
    resolver: Arc<VideoResolver>,
    negative_ttl: Duration,
}

impl MediaCache {
    /// Build the cache around a video search provider.
    pub fn new(provider: Arc<dyn VideoSearchProvider>, settings: &MediaSettings) -> Self {
        let resolver = VideoResolver::new(provider, settings.provider_timeout, settings.max_results);
        // A lookup that is still walking its strategies must stay joinable.
        let inflight_ttl = settings.inflight_ttl.max(resolver.longest_run());
        Self {
            registry: InFlightRegistry::new(inflight_ttl, settings.quota_backoff),
            resolver: Arc::new(resolver),
            negative_ttl: settings.negative_ttl,
        }
    }

    /// Resolve `(artist, track)` for the requested preference.
    ///
    /// `store` is `None` while storage is degraded; lookups then go straight to the provider and
    /// nothing is persisted.
    pub async fn resolve(
        &self,
        store: Option<Arc<dyn GameStore>>,
        artist: &str,
        track: &str,
        prefer_video: bool,
    ) -> MediaLookup {
        let key = track_key(artist, track);
        let preference = MediaPreference::from_prefer_video(prefer_video);

        if let Some(InFlight::Pending(lookup)) = self.registry.peek(&key, preference) {
            debug!(track_key = %key, ?preference, "joining in-flight lookup");
            return lookup.await;
        }

        // Durable hits win over a quota suppression.
        if let Some(store) = &store {
            if let Some(hit) = cached(store.as_ref(), &key, preference, self.negative_ttl).await {
                return hit;
            }
        }

        let job = LookupJob {
            store,
            resolver: self.resolver.clone(),
            negative_ttl: self.negative_ttl,
            track_key: key.clone(),
            artist: artist.trim().to_owned(),
            track: track.trim().to_owned(),
            preference,
        };
        match self
            .registry
            .claim(&key, preference, move || Box::pin(job.run()))
        {
            InFlight::Pending(lookup) => lookup.await,
            InFlight::Suppressed => {
                debug!(track_key = %key, ?preference, "provider quota suppressed");
                MediaLookup::TemporarilyUnavailable(UnavailableReason::QuotaExceeded)
            }
        }
    }

    /// Live in-flight and suppression entries in this process.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Counts over the durable cache plus the local in-flight size.
    pub async fn stats(&self, store: Arc<dyn GameStore>) -> StorageResult<CacheStats> {
        let entries = store.list_media_entries().await?;
        Ok(CacheStats::collect(&entries, self.registry.len()))
    }

    /// Remove entries selected by `policy`.
    pub async fn evict(
        &self,
        store: Arc<dyn GameStore>,
        policy: &EvictionPolicy,
        now: SystemTime,
    ) -> StorageResult<EvictionReport> {
        let entries = store.list_media_entries().await?;
        let plan = eviction::plan(&entries, policy, now);
        let mut report = EvictionReport {
            examined: entries.len(),
            idle: plan.idle.len(),
            unpopular: plan.unpopular.len(),
            overflow: plan.overflow.len(),
            deleted: 0,
        };
        if !plan.is_empty() {
            report.deleted = store.delete_media_entries(plan.keys()).await?;
        }
        info!(
            examined = report.examined,
            deleted = report.deleted,
            "media cache eviction completed"
        );
        Ok(report)
    }
}

/// Answer from the durable cache when it can. Storage failures fall through to the provider.
async fn cached(
    store: &dyn GameStore,
    key: &str,
    preference: MediaPreference,
    negative_ttl: Duration,
) -> Option<MediaLookup> {
    let entry = match store.find_media_entry(key.to_owned()).await {
        Ok(entry) => entry?,
        Err(err) => {
            warn!(track_key = %key, error = %err, "media cache read failed");
            return None;
        }
    };

    let now = SystemTime::now();
    let hit = match entry.variant(preference)? {
        variant @ MediaVariantEntity::Resolved { .. } => MediaLookup::from_variant(variant)?,
        MediaVariantEntity::NotFound { checked_at } => {
            let age = now.duration_since(*checked_at).unwrap_or_default();
            if age >= negative_ttl {
                return None;
            }
            MediaLookup::NotFound
        }
    };

    let touch = MediaEntryUpdate::Touch { preference, at: now };
    if let Err(err) = store.update_media_entry(key.to_owned(), touch).await {
        warn!(track_key = %key, error = %err, "failed to record media cache hit");
    }
    Some(hit)
}

/// Work performed by the single caller that won the in-flight claim.
struct LookupJob {
    store: Option<Arc<dyn GameStore>>,
    resolver: Arc<VideoResolver>,
    negative_ttl: Duration,
    track_key: String,
    artist: String,
    track: String,
    preference: MediaPreference,
}

impl LookupJob {
    async fn run(self) -> MediaLookup {
        // A previous leader may have persisted between our cache read and the claim.
        if let Some(store) = &self.store {
            if let Some(hit) = cached(
                store.as_ref(),
                &self.track_key,
                self.preference,
                self.negative_ttl,
            )
            .await
            {
                return hit;
            }
        }

        let now = SystemTime::now();
        match self
            .resolver
            .resolve(&self.artist, &self.track, self.preference)
            .await
        {
            Ok(Some(candidate)) => {
                info!(
                    track_key = %self.track_key,
                    preference = ?self.preference,
                    external_id = %candidate.external_id,
                    confidence = candidate.confidence,
                    "media resolved"
                );
                let found = MediaLookup::Found(ResolvedMedia {
                    external_id: candidate.external_id.clone(),
                    title: candidate.title.clone(),
                    thumbnail: candidate.thumbnail.clone(),
                    confidence: candidate.confidence,
                    from_cache: false,
                    is_video: candidate.is_video,
                });
                self.persist(resolved_variant(candidate, now), now).await;
                found
            }
            Ok(None) => {
                info!(track_key = %self.track_key, preference = ?self.preference, "media not found");
                let stored = self
                    .persist(MediaVariantEntity::NotFound { checked_at: now }, now)
                    .await;
                // Another process may have resolved this variant meanwhile; a match wins.
                stored
                    .as_ref()
                    .and_then(|entry| entry.variant(self.preference))
                    .and_then(MediaLookup::from_variant)
                    .unwrap_or(MediaLookup::NotFound)
            }
            Err(err) => {
                warn!(
                    track_key = %self.track_key,
                    preference = ?self.preference,
                    error = %err,
                    "media provider unavailable"
                );
                MediaLookup::TemporarilyUnavailable(UnavailableReason::from(&err))
            }
        }
    }

    async fn persist(&self, variant: MediaVariantEntity, at: SystemTime) -> Option<MediaCacheEntity> {
        let store = self.store.as_ref()?;
        let update = MediaEntryUpdate::RecordVariant {
            artist: self.artist.clone(),
            track: self.track.clone(),
            preference: self.preference,
            variant,
            at,
        };
        match store.update_media_entry(self.track_key.clone(), update).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(track_key = %self.track_key, error = %err, "failed to persist media lookup");
                None
            }
        }
    }
}

fn resolved_variant(candidate: VideoCandidate, at: SystemTime) -> MediaVariantEntity {
    MediaVariantEntity::Resolved {
        external_id: candidate.external_id,
        title: candidate.title,
        thumbnail: candidate.thumbnail,
        confidence: candidate.confidence,
        is_video: candidate.is_video,
        first_resolved_at: at,
        last_accessed_at: at,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::{BoxFuture, join_all};

    use super::*;
    use crate::{
        dao::game_store::memory::MemoryGameStore,
        providers::{ProviderResult, VideoSearchItem},
    };

    /// Counts calls and answers every query the same way after an optional delay.
    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
        answer: fn(&str) -> ProviderResult<Vec<VideoSearchItem>>,
    }

    impl CountingProvider {
        fn new(answer: fn(&str) -> ProviderResult<Vec<VideoSearchItem>>) -> Arc<Self> {
            Self::with_delay(answer, Duration::from_millis(50))
        }

        fn with_delay(
            answer: fn(&str) -> ProviderResult<Vec<VideoSearchItem>>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                answer,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl VideoSearchProvider for CountingProvider {
        fn search(
            &self,
            query: String,
            _category: Option<&'static str>,
            _max_results: u32,
        ) -> BoxFuture<'static, ProviderResult<Vec<VideoSearchItem>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            let answer = (self.answer)(&query);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                answer
            })
        }
    }

    fn by_flavor(query: &str) -> ProviderResult<Vec<VideoSearchItem>> {
        let (id, title, channel) = if query.ends_with("official music video") {
            ("video-id", "Daft Punk - One More Time (Official Music Video)", "DaftPunkVEVO")
        } else {
            ("audio-id", "One More Time", "Daft Punk - Topic")
        };
        Ok(vec![VideoSearchItem {
            id: id.into(),
            title: title.into(),
            thumbnail: Some(format!("https://img.test/{id}.jpg")),
            channel_title: channel.into(),
            published_at: None,
        }])
    }

    fn nothing(_: &str) -> ProviderResult<Vec<VideoSearchItem>> {
        Ok(Vec::new())
    }

    fn quota(_: &str) -> ProviderResult<Vec<VideoSearchItem>> {
        Err(ProviderError::QuotaExceeded { provider: "fake" })
    }

    fn cache(provider: Arc<CountingProvider>) -> MediaCache {
        MediaCache::new(provider, &MediaSettings::default())
    }

    fn found(lookup: MediaLookup) -> ResolvedMedia {
        match lookup {
            MediaLookup::Found(media) => media,
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_hit_the_provider_once() {
        let provider = CountingProvider::new(by_flavor);
        let cache = cache(provider.clone());
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());

        let lookups = (0..8).map(|_| {
            cache.resolve(Some(store.clone()), "Daft Punk", "One More Time", false)
        });
        let results = join_all(lookups).await;

        assert_eq!(provider.calls(), 1);
        for result in results {
            assert_eq!(found(result).external_id, "audio-id");
        }

        let entry = store
            .find_media_entry(track_key("Daft Punk", "One More Time"))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.audio.is_some());
        assert!(entry.video.is_none());
    }

    #[tokio::test]
    async fn variants_are_resolved_and_served_independently() {
        let provider = CountingProvider::new(by_flavor);
        let cache = cache(provider.clone());
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());

        let audio = found(cache.resolve(Some(store.clone()), "Daft Punk", "One More Time", false).await);
        assert!(!audio.from_cache);

        // The cached audio variant must not satisfy a video request.
        let video = found(cache.resolve(Some(store.clone()), "daft punk", "one more time!", true).await);
        assert_eq!(video.external_id, "video-id");
        assert!(video.is_video);
        assert!(!video.from_cache);
        assert_eq!(provider.calls(), 2);

        let again = found(cache.resolve(Some(store.clone()), "Daft Punk", "One More Time", true).await);
        assert!(again.from_cache);
        assert_eq!(again.external_id, "video-id");
        assert_eq!(provider.calls(), 2);

        let entry = store
            .find_media_entry(track_key("Daft Punk", "One More Time"))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.audio.as_ref().is_some_and(MediaVariantEntity::is_resolved));
        assert!(entry.video.as_ref().is_some_and(MediaVariantEntity::is_resolved));
        assert_eq!(entry.access_count, 3);
    }

    #[tokio::test]
    async fn not_found_is_cached_as_a_marker() {
        let provider = CountingProvider::new(nothing);
        let cache = cache(provider.clone());
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());

        let first = cache.resolve(Some(store.clone()), "Nobody", "Nothing", false).await;
        assert_eq!(first, MediaLookup::NotFound);
        let calls = provider.calls();

        let second = cache.resolve(Some(store.clone()), "Nobody", "Nothing", false).await;
        assert_eq!(second, MediaLookup::NotFound);
        assert_eq!(provider.calls(), calls);
    }

    #[tokio::test]
    async fn negative_hits_count_as_accesses() {
        let provider = CountingProvider::new(nothing);
        let cache = cache(provider.clone());
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());
        let key = track_key("Nobody", "Nothing");

        cache.resolve(Some(store.clone()), "Nobody", "Nothing", true).await;
        let before = store.find_media_entry(key.clone()).await.unwrap().unwrap();

        for _ in 0..2 {
            let hit = cache.resolve(Some(store.clone()), "Nobody", "Nothing", true).await;
            assert_eq!(hit, MediaLookup::NotFound);
        }
        let after = store.find_media_entry(key).await.unwrap().unwrap();
        assert_eq!(after.access_count, before.access_count + 2);
        assert!(after.last_accessed_at >= before.last_accessed_at);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookups_stay_joinable_past_the_inflight_ttl() {
        let per_call = Duration::from_millis(7_900);
        let provider = CountingProvider::with_delay(nothing, per_call);
        let cache = cache(provider.clone());
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());

        let late_caller = async {
            tokio::time::sleep(Duration::from_secs(31)).await;
            cache.resolve(Some(store.clone()), "The Beatles", "Hey Jude", false).await
        };
        let (first, second) = tokio::join!(
            cache.resolve(Some(store.clone()), "The Beatles", "Hey Jude", false),
            late_caller,
        );

        assert_eq!(first, MediaLookup::NotFound);
        assert_eq!(second, MediaLookup::NotFound);
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn durable_match_wins_over_quota_suppression() {
        let provider = CountingProvider::new(quota);
        let cache = cache(provider.clone());
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());

        let first = cache.resolve(Some(store.clone()), "Daft Punk", "One More Time", true).await;
        assert!(first.is_quota_exhausted());

        // Another instance resolves the variant while this one is suppressed.
        let now = SystemTime::now();
        let candidate = VideoCandidate {
            external_id: "video-id".into(),
            title: "Daft Punk - One More Time (Official Music Video)".into(),
            thumbnail: None,
            confidence: 0.9,
            is_video: true,
        };
        let update = MediaEntryUpdate::RecordVariant {
            artist: "Daft Punk".into(),
            track: "One More Time".into(),
            preference: MediaPreference::Video,
            variant: resolved_variant(candidate, now),
            at: now,
        };
        store
            .update_media_entry(track_key("Daft Punk", "One More Time"), update)
            .await
            .unwrap();

        let media = found(cache.resolve(Some(store.clone()), "Daft Punk", "One More Time", true).await);
        assert!(media.from_cache);
        assert_eq!(media.external_id, "video-id");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_is_not_cached_and_suppresses_retries() {
        let provider = CountingProvider::new(quota);
        let cache = cache(provider.clone());
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());

        let first = cache.resolve(Some(store.clone()), "A", "B", true).await;
        assert!(first.is_quota_exhausted());
        assert_eq!(provider.calls(), 1);

        let second = cache.resolve(Some(store.clone()), "A", "B", true).await;
        assert!(second.is_quota_exhausted());
        assert_eq!(provider.calls(), 1);
        assert!(store.find_media_entry(track_key("A", "B")).await.unwrap().is_none());

        tokio::time::advance(MediaSettings::default().quota_backoff + Duration::from_secs(1)).await;
        cache.resolve(Some(store.clone()), "A", "B", true).await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn degraded_storage_still_resolves() {
        let provider = CountingProvider::new(by_flavor);
        let cache = cache(provider.clone());

        let media = found(cache.resolve(None, "Daft Punk", "One More Time", true).await);
        assert_eq!(media.external_id, "video-id");
        assert!(!media.from_cache);
    }

    #[tokio::test]
    async fn stats_and_eviction_cover_the_store() {
        let provider = CountingProvider::new(by_flavor);
        let cache = cache(provider);
        let store: Arc<dyn GameStore> = Arc::new(MemoryGameStore::new());

        cache.resolve(Some(store.clone()), "Daft Punk", "One More Time", false).await;
        cache.resolve(Some(store.clone()), "Daft Punk", "Aerodynamic", true).await;

        let stats = cache.stats(store.clone()).await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.audio.resolved, 1);
        assert_eq!(stats.video.resolved, 1);
        assert_eq!(stats.total_accesses, 2);
        assert!(stats.mean_confidence.is_some());

        let policy = EvictionPolicy {
            max_idle: None,
            min_access_count: 0,
            grace_period: Duration::ZERO,
            max_entries: Some(1),
        };
        let report = cache
            .evict(store.clone(), &policy, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.overflow, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(store.list_media_entries().await.unwrap().len(), 1);
    }
}
