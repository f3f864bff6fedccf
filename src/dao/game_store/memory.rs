//! Process-local store backed by [`DashMap`], used by tests and `STORAGE_BACKEND=memory`.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    game_store::GameStore,
    models::{MediaCacheEntity, MediaEntryUpdate, SessionEntity},
    storage::{StorageError, StorageResult},
};

/// In-memory implementation of [`GameStore`].
#[derive(Clone, Default)]
pub struct MemoryGameStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    codes: DashMap<String, Uuid>,
    media: DashMap<String, MediaCacheEntity>,
}

impl MemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        match self.inner.codes.entry(session.code.clone()) {
            Entry::Occupied(_) => {
                return Err(StorageError::conflict(format!(
                    "session code `{}`",
                    session.code
                )));
            }
            Entry::Vacant(slot) => {
                if self.inner.sessions.contains_key(&session.id) {
                    return Err(StorageError::conflict(format!("session `{}`", session.id)));
                }
                slot.insert(session.id);
            }
        }
        self.inner.sessions.insert(session.id, session);
        Ok(())
    }

    fn save_session(&self, session: SessionEntity, expected_version: u64) -> StorageResult<()> {
        let Some(mut stored) = self.inner.sessions.get_mut(&session.id) else {
            return Err(StorageError::conflict(format!("session `{}`", session.id)));
        };
        if stored.version != expected_version {
            return Err(StorageError::conflict(format!("session `{}`", session.id)));
        }
        *stored = session;
        Ok(())
    }

    fn update_media_entry(
        &self,
        track_key: String,
        update: MediaEntryUpdate,
    ) -> Option<MediaCacheEntity> {
        match self.inner.media.entry(track_key.clone()) {
            Entry::Occupied(mut slot) => {
                let next = update.apply(&track_key, Some(slot.get().clone()))?;
                slot.insert(next.clone());
                Some(next)
            }
            Entry::Vacant(slot) => {
                let next = update.apply(&track_key, None)?;
                slot.insert(next.clone());
                Some(next)
            }
        }
    }
}

impl GameStore for MemoryGameStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session) })
    }

    fn save_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session, expected_version) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .sessions
                .get(&id)
                .map(|entry| entry.value().clone()))
        })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(id) = store.inner.codes.get(&code).map(|entry| *entry.value()) else {
                return Ok(None);
            };
            Ok(store
                .inner
                .sessions
                .get(&id)
                .map(|entry| entry.value().clone()))
        })
    }

    fn find_media_entry(
        &self,
        track_key: String,
    ) -> BoxFuture<'static, StorageResult<Option<MediaCacheEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .media
                .get(&track_key)
                .map(|entry| entry.value().clone()))
        })
    }

    fn update_media_entry(
        &self,
        track_key: String,
        update: MediaEntryUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<MediaCacheEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.update_media_entry(track_key, update)) })
    }

    fn list_media_entries(&self) -> BoxFuture<'static, StorageResult<Vec<MediaCacheEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .inner
                .media
                .iter()
                .map(|entry| entry.value().clone())
                .collect())
        })
    }

    fn delete_media_entries(
        &self,
        track_keys: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(track_keys
                .iter()
                .filter(|key| store.inner.media.remove(*key).is_some())
                .count())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::state::session::GameSession;

    fn entity(code: &str) -> SessionEntity {
        GameSession::new(code.into(), Uuid::new_v4(), "host".into(), SystemTime::now()).into()
    }

    #[tokio::test]
    async fn codes_are_unique() {
        let store = MemoryGameStore::new();
        GameStore::insert_session(&store, entity("ABCDEF")).await.unwrap();
        let err = GameStore::insert_session(&store, entity("ABCDEF"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn stale_versions_are_rejected() {
        let store = MemoryGameStore::new();
        let mut session = entity("QWERTY");
        GameStore::insert_session(&store, session.clone()).await.unwrap();

        session.version = 1;
        GameStore::save_session(&store, session.clone(), 0).await.unwrap();

        let err = GameStore::save_session(&store, session.clone(), 0)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let loaded = GameStore::find_session_by_code(&store, "QWERTY".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.version, 1);
    }
}
