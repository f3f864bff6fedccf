use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dto::validation::validate_not_blank,
    media::{EvictionPolicy, MediaLookup, UnavailableReason},
};

/// Query of `GET /media/resolve`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct ResolveMediaQuery {
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub artist: String,
    #[validate(length(min = 1, max = 200), custom(function = "validate_not_blank"))]
    pub track: String,
    /// Ask for the video-like variant instead of the audio-like one.
    #[serde(default)]
    pub prefer_video: bool,
}

/// Lookup status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Found,
    NotFound,
    TemporarilyUnavailable,
}

/// Matched upload.
#[derive(Debug, Serialize, ToSchema)]
pub struct MediaView {
    pub external_id: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub confidence: f32,
    pub from_cache: bool,
    pub is_video: bool,
}

/// Response of `GET /media/resolve`.
#[derive(Debug, Serialize, ToSchema)]
pub struct MediaLookupResponse {
    pub status: LookupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
}

impl From<MediaLookup> for MediaLookupResponse {
    fn from(lookup: MediaLookup) -> Self {
        match lookup {
            MediaLookup::Found(media) => Self {
                status: LookupStatus::Found,
                media: Some(MediaView {
                    external_id: media.external_id,
                    title: media.title,
                    thumbnail: media.thumbnail,
                    confidence: media.confidence,
                    from_cache: media.from_cache,
                    is_video: media.is_video,
                }),
                reason: None,
            },
            MediaLookup::NotFound => Self {
                status: LookupStatus::NotFound,
                media: None,
                reason: None,
            },
            MediaLookup::TemporarilyUnavailable(reason) => Self {
                status: LookupStatus::TemporarilyUnavailable,
                media: None,
                reason: Some(reason),
            },
        }
    }
}

/// Overrides of the configured eviction policy for one sweep.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct EvictRequest {
    pub max_idle_seconds: Option<u64>,
    pub min_access_count: Option<u64>,
    pub grace_period_seconds: Option<u64>,
    #[validate(range(min = 1))]
    pub max_entries: Option<usize>,
}

impl EvictRequest {
    /// Apply the overrides on top of `base`.
    pub fn merge_into(self, base: &EvictionPolicy) -> EvictionPolicy {
        EvictionPolicy {
            max_idle: self
                .max_idle_seconds
                .map(Duration::from_secs)
                .or(base.max_idle),
            min_access_count: self.min_access_count.unwrap_or(base.min_access_count),
            grace_period: self
                .grace_period_seconds
                .map(Duration::from_secs)
                .unwrap_or(base.grace_period),
            max_entries: self.max_entries.or(base.max_entries),
        }
    }
}

/// Query of `GET /songs/search`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct SongSearchQuery {
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub q: String,
    #[validate(range(min = 1, max = 50))]
    pub limit: Option<u32>,
}
