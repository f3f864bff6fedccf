#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{MediaCacheEntity, MediaEntryUpdate, SessionEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Attempts of a per-key compare-and-swap loop before reporting a conflict.
pub(crate) const MAX_CAS_ATTEMPTS: usize = 8;

/// Abstraction over the persistence layer for game sessions and the media lookup cache.
pub trait GameStore: Send + Sync {
    /// Persist a brand new session. Fails with a conflict when the id or code is taken.
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace a session if its stored version still equals `expected_version`.
    fn save_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a session by id.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Load a session by its join code.
    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Load a lookup cache entry.
    fn find_media_entry(
        &self,
        track_key: String,
    ) -> BoxFuture<'static, StorageResult<Option<MediaCacheEntity>>>;
    /// Atomically apply a mutation to a lookup cache entry, returning the stored result.
    fn update_media_entry(
        &self,
        track_key: String,
        update: MediaEntryUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<MediaCacheEntity>>>;
    /// List every lookup cache entry (maintenance only).
    fn list_media_entries(&self) -> BoxFuture<'static, StorageResult<Vec<MediaCacheEntity>>>;
    /// Delete the given lookup cache entries, returning how many were removed.
    fn delete_media_entries(
        &self,
        track_keys: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<usize>>;
    /// Check that the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
