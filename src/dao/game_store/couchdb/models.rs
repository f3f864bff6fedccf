use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{MediaCacheEntity, SessionEntity};

pub const SESSION_PREFIX: &str = "session::";
pub const SESSION_CODE_PREFIX: &str = "session-code::";
pub const MEDIA_PREFIX: &str = "media::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Revision returned by CouchDB after a successful write.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub session: SessionEntity,
}

impl From<(SessionEntity, Option<String>)> for CouchSessionDocument {
    fn from((session, rev): (SessionEntity, Option<String>)) -> Self {
        Self {
            id: session_doc_id(session.id),
            rev,
            session,
        }
    }
}

/// Index document reserving a join code; creating it first makes codes unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionCodeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchMediaDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub entry: MediaCacheEntity,
}

impl From<(MediaCacheEntity, Option<String>)> for CouchMediaDocument {
    fn from((entry, rev): (MediaCacheEntity, Option<String>)) -> Self {
        Self {
            id: media_doc_id(&entry.track_key),
            rev,
            entry,
        }
    }
}

pub fn session_doc_id(id: Uuid) -> String {
    format!("{SESSION_PREFIX}{id}")
}

pub fn session_code_doc_id(code: &str) -> String {
    format!("{SESSION_CODE_PREFIX}{code}")
}

pub fn media_doc_id(track_key: &str) -> String {
    format!("{MEDIA_PREFIX}{track_key}")
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::state::session::GameSession;

    #[test]
    fn session_document_keeps_entity_fields_flat() {
        let session: SessionEntity =
            GameSession::new("ABCDEF".into(), Uuid::new_v4(), "host".into(), SystemTime::now())
                .into();
        let document = CouchSessionDocument::from((session.clone(), None));

        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["_id"], format!("session::{}", session.id));
        assert!(json.get("_rev").is_none());
        assert_eq!(json["code"], "ABCDEF");

        let parsed: CouchSessionDocument = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.session, session);
    }
}
