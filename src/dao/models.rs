use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::{
    prompts::Prompt,
    session::{Countdown, GameSession, Player, PlayerId, RoundRecord, RoundResult, Submission},
    state_machine::GamePhase,
};

/// Persisted representation of a game session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntity {
    /// Stable identifier for the session.
    pub id: Uuid,
    /// Join code, unique across live sessions.
    pub code: String,
    /// Current phase.
    pub phase: GamePhase,
    /// Host player.
    pub host_id: PlayerId,
    /// Ordered roster.
    pub roster: Vec<Player>,
    /// Players locked into the current round.
    pub active_participants: Vec<PlayerId>,
    /// Prompt of the current round.
    pub current_prompt: Option<Prompt>,
    /// Submissions of the current round.
    pub submissions: Vec<Submission>,
    /// Archived rounds.
    pub previous_rounds: Vec<RoundRecord>,
    /// Forced-advance countdown, if any.
    pub countdown: Option<Countdown>,
    /// Current round number.
    pub round_number: u32,
    /// Speed bonus claim for the current round.
    pub speed_bonus_claimed: bool,
    /// Synthesized passes of the current round.
    pub forced_passes: Vec<PlayerId>,
    /// Last closed voting result.
    pub last_round: Option<RoundResult>,
    /// Prompt ids already drawn.
    pub used_prompt_ids: Vec<String>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last write timestamp.
    pub updated_at: SystemTime,
    /// End timestamp.
    pub ended_at: Option<SystemTime>,
    /// Retention horizon.
    pub expires_at: Option<SystemTime>,
    /// Optimistic concurrency counter.
    pub version: u64,
}

impl From<GameSession> for SessionEntity {
    fn from(session: GameSession) -> Self {
        Self {
            id: session.id,
            code: session.code,
            phase: session.phase,
            host_id: session.host_id,
            roster: session.roster,
            active_participants: session.active_participants.into_iter().collect(),
            current_prompt: session.current_prompt,
            submissions: session.submissions,
            previous_rounds: session.previous_rounds,
            countdown: session.countdown,
            round_number: session.round_number,
            speed_bonus_claimed: session.speed_bonus_claimed,
            forced_passes: session.forced_passes,
            last_round: session.last_round,
            used_prompt_ids: session.used_prompt_ids,
            created_at: session.created_at,
            updated_at: session.updated_at,
            ended_at: session.ended_at,
            expires_at: session.expires_at,
            version: session.version,
        }
    }
}

impl From<SessionEntity> for GameSession {
    fn from(entity: SessionEntity) -> Self {
        Self {
            id: entity.id,
            code: entity.code,
            phase: entity.phase,
            host_id: entity.host_id,
            roster: entity.roster,
            active_participants: entity.active_participants.into_iter().collect(),
            current_prompt: entity.current_prompt,
            submissions: entity.submissions,
            previous_rounds: entity.previous_rounds,
            countdown: entity.countdown,
            round_number: entity.round_number,
            speed_bonus_claimed: entity.speed_bonus_claimed,
            forced_passes: entity.forced_passes,
            last_round: entity.last_round,
            used_prompt_ids: entity.used_prompt_ids,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
            ended_at: entity.ended_at,
            expires_at: entity.expires_at,
            version: entity.version,
        }
    }
}

/// Which of the two independent variants of a cache entry a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPreference {
    /// Audio-like upload (topic channels, "official audio").
    Audio,
    /// Video-like upload (music videos, VEVO).
    Video,
}

impl MediaPreference {
    /// Map the `preferVideo` flag of a lookup.
    pub fn from_prefer_video(prefer_video: bool) -> Self {
        if prefer_video {
            MediaPreference::Video
        } else {
            MediaPreference::Audio
        }
    }

    /// Whether this is the video preference.
    pub fn is_video(self) -> bool {
        matches!(self, MediaPreference::Video)
    }
}

/// Cached outcome for one variant of a track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaVariantEntity {
    /// A matching upload was found.
    Resolved {
        /// Provider identifier (e.g. YouTube video id).
        external_id: String,
        /// Upload title.
        title: String,
        /// Thumbnail URL.
        thumbnail: Option<String>,
        /// Match confidence in `[0, 1]`.
        confidence: f32,
        /// Whether the upload was classified as video-like.
        is_video: bool,
        /// First successful resolution.
        first_resolved_at: SystemTime,
        /// Last time this variant was served.
        last_accessed_at: SystemTime,
    },
    /// The provider confirmed there is no match.
    NotFound {
        /// When the provider was queried.
        checked_at: SystemTime,
    },
}

impl MediaVariantEntity {
    /// Whether the variant holds a match.
    pub fn is_resolved(&self) -> bool {
        matches!(self, MediaVariantEntity::Resolved { .. })
    }
}

/// Durable lookup cache entry keyed by normalized `(artist, track)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaCacheEntity {
    /// Normalized key (`artist:track`).
    pub track_key: String,
    /// Artist as first requested, for display.
    pub artist: String,
    /// Track as first requested, for display.
    pub track: String,
    /// Audio-preference variant.
    pub audio: Option<MediaVariantEntity>,
    /// Video-preference variant.
    pub video: Option<MediaVariantEntity>,
    /// Number of lookups served by this entry.
    pub access_count: u64,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last lookup served.
    pub last_accessed_at: SystemTime,
    /// Compare-and-swap counter used by the backends.
    pub revision: u64,
}

impl MediaCacheEntity {
    /// Variant cached for the given preference.
    pub fn variant(&self, preference: MediaPreference) -> Option<&MediaVariantEntity> {
        match preference {
            MediaPreference::Audio => self.audio.as_ref(),
            MediaPreference::Video => self.video.as_ref(),
        }
    }

    fn variant_mut(&mut self, preference: MediaPreference) -> &mut Option<MediaVariantEntity> {
        match preference {
            MediaPreference::Audio => &mut self.audio,
            MediaPreference::Video => &mut self.video,
        }
    }
}

/// Single-entry mutation applied by the store under its per-key consistency guarantee.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEntryUpdate {
    /// Store the outcome of a provider lookup, creating the entry if absent.
    RecordVariant {
        /// Display artist.
        artist: String,
        /// Display track.
        track: String,
        /// Targeted variant.
        preference: MediaPreference,
        /// Outcome to store.
        variant: MediaVariantEntity,
        /// Write time.
        at: SystemTime,
    },
    /// Bump access bookkeeping after a cache hit.
    Touch {
        /// Variant that was served.
        preference: MediaPreference,
        /// Access time.
        at: SystemTime,
    },
}

impl MediaEntryUpdate {
    /// Compute the next state of an entry. `None` means there is nothing to write.
    ///
    /// A resolved variant is never downgraded to a negative marker.
    pub fn apply(
        &self,
        track_key: &str,
        current: Option<MediaCacheEntity>,
    ) -> Option<MediaCacheEntity> {
        match self {
            MediaEntryUpdate::RecordVariant {
                artist,
                track,
                preference,
                variant,
                at,
            } => {
                let mut entry = current.unwrap_or_else(|| MediaCacheEntity {
                    track_key: track_key.to_owned(),
                    artist: artist.clone(),
                    track: track.clone(),
                    audio: None,
                    video: None,
                    access_count: 0,
                    created_at: *at,
                    last_accessed_at: *at,
                    revision: 0,
                });
                let slot = entry.variant_mut(*preference);
                let downgrade = !variant.is_resolved()
                    && slot.as_ref().is_some_and(MediaVariantEntity::is_resolved);
                if !downgrade {
                    *slot = Some(variant.clone());
                }
                entry.access_count += 1;
                entry.last_accessed_at = *at;
                entry.revision += 1;
                Some(entry)
            }
            MediaEntryUpdate::Touch { preference, at } => {
                let mut entry = current?;
                if let Some(MediaVariantEntity::Resolved {
                    last_accessed_at, ..
                }) = entry.variant_mut(*preference)
                {
                    *last_accessed_at = *at;
                }
                entry.access_count += 1;
                entry.last_accessed_at = *at;
                entry.revision += 1;
                Some(entry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn resolved(id: &str, at: SystemTime) -> MediaVariantEntity {
        MediaVariantEntity::Resolved {
            external_id: id.into(),
            title: "title".into(),
            thumbnail: None,
            confidence: 0.9,
            is_video: false,
            first_resolved_at: at,
            last_accessed_at: at,
        }
    }

    fn record(preference: MediaPreference, variant: MediaVariantEntity, at: SystemTime) -> MediaEntryUpdate {
        MediaEntryUpdate::RecordVariant {
            artist: "Daft Punk".into(),
            track: "One More Time".into(),
            preference,
            variant,
            at,
        }
    }

    #[test]
    fn record_creates_entry_with_single_variant() {
        let entry = record(MediaPreference::Audio, resolved("abc", t(1)), t(1))
            .apply("daftpunk:onemoretime", None)
            .unwrap();

        assert_eq!(entry.track_key, "daftpunk:onemoretime");
        assert!(entry.audio.is_some());
        assert!(entry.video.is_none());
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.revision, 1);
    }

    #[test]
    fn variants_are_independent() {
        let entry = record(MediaPreference::Audio, resolved("abc", t(1)), t(1))
            .apply("k", None);
        let entry = record(
            MediaPreference::Video,
            MediaVariantEntity::NotFound { checked_at: t(2) },
            t(2),
        )
        .apply("k", entry)
        .unwrap();

        assert!(entry.variant(MediaPreference::Audio).unwrap().is_resolved());
        assert!(!entry.variant(MediaPreference::Video).unwrap().is_resolved());
        assert_eq!(entry.created_at, t(1));
        assert_eq!(entry.revision, 2);
    }

    #[test]
    fn negative_marker_never_replaces_a_match() {
        let entry = record(MediaPreference::Audio, resolved("abc", t(1)), t(1))
            .apply("k", None);
        let entry = record(
            MediaPreference::Audio,
            MediaVariantEntity::NotFound { checked_at: t(2) },
            t(2),
        )
        .apply("k", entry)
        .unwrap();

        assert!(entry.audio.unwrap().is_resolved());
    }

    #[test]
    fn touch_requires_an_existing_entry() {
        let touch = MediaEntryUpdate::Touch {
            preference: MediaPreference::Audio,
            at: t(5),
        };
        assert!(touch.apply("k", None).is_none());

        let entry = record(MediaPreference::Audio, resolved("abc", t(1)), t(1)).apply("k", None);
        let entry = touch.apply("k", entry).unwrap();
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_accessed_at, t(5));
        match entry.audio.unwrap() {
            MediaVariantEntity::Resolved {
                last_accessed_at,
                first_resolved_at,
                ..
            } => {
                assert_eq!(last_accessed_at, t(5));
                assert_eq!(first_resolved_at, t(1));
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }
}
