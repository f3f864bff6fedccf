//! Picks the best upload for a track from the video search provider.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::debug;

use crate::{
    dao::models::MediaPreference,
    media::key::normalize,
    providers::{ProviderError, VideoSearchItem, VideoSearchProvider, youtube::MUSIC_CATEGORY},
};

const VIDEO_STRATEGIES: [&str; 3] = ["official music video", "official video", ""];
const AUDIO_STRATEGIES: [&str; 4] = ["official audio", "topic", "audio", ""];

const AUDIO_TITLE_KEYWORDS: [&str; 6] = [
    "official audio",
    "(audio)",
    "[audio]",
    "audio only",
    "lyric",
    "visualizer",
];
const VIDEO_TITLE_KEYWORDS: [&str; 5] = [
    "official video",
    "music video",
    "official mv",
    "(mv)",
    "[mv]",
];

/// Best match for one lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoCandidate {
    /// Provider video id.
    pub external_id: String,
    /// Upload title.
    pub title: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Match confidence in `[0, 1]`.
    pub confidence: f32,
    /// Whether the upload was classified as video-like.
    pub is_video: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    AudioLike,
    VideoLike,
    Unknown,
}

impl Flavor {
    fn of(item: &VideoSearchItem) -> Self {
        let channel = item.channel_title.to_lowercase();
        if channel.contains("topic") {
            return Flavor::AudioLike;
        }
        if channel.contains("vevo") {
            return Flavor::VideoLike;
        }

        let title = item.title.to_lowercase();
        if VIDEO_TITLE_KEYWORDS.iter().any(|kw| title.contains(kw)) {
            Flavor::VideoLike
        } else if AUDIO_TITLE_KEYWORDS.iter().any(|kw| title.contains(kw)) {
            Flavor::AudioLike
        } else {
            Flavor::Unknown
        }
    }

    fn agrees_with(self, preference: MediaPreference) -> bool {
        matches!(
            (self, preference),
            (Flavor::VideoLike, MediaPreference::Video) | (Flavor::AudioLike, MediaPreference::Audio)
        )
    }
}

/// Additive match score, capped at 1.0.
pub fn confidence(title: &str, artist: &str, track: &str) -> f32 {
    let lowered = title.to_lowercase();
    let normalized = normalize(title);
    let artist = normalize(artist);
    let track = normalize(track);

    let mut score = 0.0_f32;
    if !artist.is_empty() && normalized.contains(&artist) {
        score += 0.3;
    }
    if !track.is_empty() && normalized.contains(&track) {
        score += 0.4;
    }
    if lowered.contains("official") {
        score += 0.2;
    }
    if lowered.contains("audio") {
        score += 0.05;
    }
    if lowered.contains("music video") {
        score += 0.15;
    }
    score.min(1.0)
}

/// Ordered query phrasings for a preference; the empty suffix is the plain query.
pub fn queries(artist: &str, track: &str, preference: MediaPreference) -> Vec<String> {
    let suffixes: &[&str] = match preference {
        MediaPreference::Video => &VIDEO_STRATEGIES,
        MediaPreference::Audio => &AUDIO_STRATEGIES,
    };
    let base = format!("{} {}", artist.trim(), track.trim());
    suffixes
        .iter()
        .map(|suffix| {
            if suffix.is_empty() {
                base.clone()
            } else {
                format!("{base} {suffix}")
            }
        })
        .collect()
}

/// Pick from one strategy's results: best agreeing match, else the first raw result.
fn pick(
    results: Vec<VideoSearchItem>,
    artist: &str,
    track: &str,
    preference: MediaPreference,
) -> Option<VideoCandidate> {
    let scored = results
        .into_iter()
        .map(|item| {
            let flavor = Flavor::of(&item);
            let confidence = confidence(&item.title, artist, track);
            (item, flavor, confidence)
        })
        .collect::<Vec<_>>();

    let mut best: Option<&(VideoSearchItem, Flavor, f32)> = None;
    for candidate in scored.iter().filter(|(_, flavor, _)| flavor.agrees_with(preference)) {
        if best.is_none_or(|current| candidate.2 > current.2) {
            best = Some(candidate);
        }
    }

    let (item, flavor, confidence) = best.or_else(|| scored.first())?;
    Some(VideoCandidate {
        external_id: item.id.clone(),
        title: item.title.clone(),
        thumbnail: item.thumbnail.clone(),
        confidence: *confidence,
        is_video: *flavor == Flavor::VideoLike,
    })
}

/// Runs the query strategies against the video search provider.
pub struct VideoResolver {
    provider: Arc<dyn VideoSearchProvider>,
    timeout: Duration,
    max_results: u32,
}

impl VideoResolver {
    /// Build a resolver bounding every provider call by `timeout`.
    pub fn new(provider: Arc<dyn VideoSearchProvider>, timeout: Duration, max_results: u32) -> Self {
        Self {
            provider,
            timeout,
            max_results,
        }
    }

    /// Upper bound on one `resolve` call: every strategy of the longer chain timing out.
    pub fn longest_run(&self) -> Duration {
        let strategies = VIDEO_STRATEGIES.len().max(AUDIO_STRATEGIES.len());
        self.timeout * strategies as u32
    }

    /// Resolve a track for the given preference.
    ///
    /// `Ok(None)` means every strategy came back empty. Quota and timeout failures are
    /// returned as errors so they are never mistaken for "no results".
    pub async fn resolve(
        &self,
        artist: &str,
        track: &str,
        preference: MediaPreference,
    ) -> Result<Option<VideoCandidate>, ProviderError> {
        for query in queries(artist, track, preference) {
            let search = self
                .provider
                .search(query.clone(), Some(MUSIC_CATEGORY), self.max_results);
            let results = timeout(self.timeout, search)
                .await
                .map_err(|_| ProviderError::Timeout {
                    provider: "video search",
                })??;

            if results.is_empty() {
                debug!(query = %query, "no results; trying next strategy");
                continue;
            }
            return Ok(pick(results, artist, track, preference));
        }

        Ok(None)
    }
}
