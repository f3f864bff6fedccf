use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{MediaCacheEntity, SessionEntity};

/// Session document: queryable envelope fields plus the serialized aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub code: String,
    pub version: i64,
    pub updated_at: DateTime,
    /// Drives the TTL index purging ended sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime>,
    pub session: SessionEntity,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(session: SessionEntity) -> Self {
        Self {
            id: session.id.to_string(),
            code: session.code.clone(),
            version: as_i64(session.version),
            updated_at: DateTime::from_system_time(session.updated_at),
            expires_at: session.expires_at.map(DateTime::from_system_time),
            session,
        }
    }
}

impl From<MongoSessionDocument> for SessionEntity {
    fn from(document: MongoSessionDocument) -> Self {
        document.session
    }
}

/// Lookup cache document keyed by the normalized track key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMediaDocument {
    #[serde(rename = "_id")]
    pub track_key: String,
    pub revision: i64,
    pub last_accessed_at: DateTime,
    pub entry: MediaCacheEntity,
}

impl From<MediaCacheEntity> for MongoMediaDocument {
    fn from(entry: MediaCacheEntity) -> Self {
        Self {
            track_key: entry.track_key.clone(),
            revision: as_i64(entry.revision),
            last_accessed_at: DateTime::from_system_time(entry.last_accessed_at),
            entry,
        }
    }
}

/// BSON has no unsigned 64-bit type; counters saturate instead of wrapping.
pub fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn session_filter(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

pub fn versioned_session_filter(id: Uuid, version: u64) -> Document {
    doc! { "_id": id.to_string(), "version": as_i64(version) }
}

pub fn media_filter(track_key: &str) -> Document {
    doc! { "_id": track_key }
}

pub fn revisioned_media_filter(track_key: &str, revision: i64) -> Document {
    doc! { "_id": track_key, "revision": revision }
}
