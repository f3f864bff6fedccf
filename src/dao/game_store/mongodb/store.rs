use std::{sync::Arc, time::Duration};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database, IndexModel,
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoMediaDocument, MongoSessionDocument, media_filter, revisioned_media_filter,
        session_filter, versioned_session_filter,
    },
};
use crate::dao::{
    game_store::{GameStore, MAX_CAS_ATTEMPTS},
    models::{MediaCacheEntity, MediaEntryUpdate, SessionEntity},
    storage::{StorageError, StorageResult},
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const MEDIA_COLLECTION_NAME: &str = "media_cache";
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed [`GameStore`] implementation.
#[derive(Clone)]
pub struct MongoGameStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database = establish_connection(&self.config).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}

impl MongoGameStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = establish_connection(&config).await?;
        let store = Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let sessions = self.sessions().await;
        let code_index = IndexModel::builder()
            .keys(doc! { "code": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("session_code_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        sessions
            .create_index(code_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "code",
                source,
            })?;

        // Ended sessions carry `expires_at`; MongoDB purges them once it passes.
        let retention_index = IndexModel::builder()
            .keys(doc! { "expires_at": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("session_retention_idx".to_owned()))
                    .expire_after(Some(Duration::ZERO))
                    .build(),
            )
            .build();
        sessions
            .create_index(retention_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "expires_at",
                source,
            })?;

        let media = self.media().await;
        let access_index = IndexModel::builder()
            .keys(doc! { "last_accessed_at": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("media_access_idx".to_owned()))
                    .build(),
            )
            .build();
        media
            .create_index(access_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: MEDIA_COLLECTION_NAME,
                index: "last_accessed_at",
                source,
            })?;

        Ok(())
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.database.read().await;
        guard.collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn media(&self) -> Collection<MongoMediaDocument> {
        let guard = self.inner.database.read().await;
        guard.collection::<MongoMediaDocument>(MEDIA_COLLECTION_NAME)
    }

    async fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        let id = session.id;
        let document = MongoSessionDocument::from(session);
        match self.sessions().await.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                Err(StorageError::conflict(format!("session `{id}`")))
            }
            Err(source) => Err(MongoDaoError::SaveSession { id, source }.into()),
        }
    }

    async fn save_session(&self, session: SessionEntity, expected_version: u64) -> StorageResult<()> {
        let id = session.id;
        let document = MongoSessionDocument::from(session);
        let result = self
            .sessions()
            .await
            .replace_one(versioned_session_filter(id, expected_version), &document)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;

        if result.matched_count == 0 {
            debug!(session_id = %id, expected_version, "stale session write rejected");
            return Err(StorageError::conflict(format!("session `{id}`")));
        }
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(session_filter(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                key: id.to_string(),
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn find_session_by_code(&self, code: String) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc! { "code": code.as_str() })
            .await
            .map_err(|source| MongoDaoError::LoadSession { key: code, source })?;
        Ok(document.map(Into::into))
    }

    async fn find_media_entry(&self, track_key: String) -> MongoResult<Option<MediaCacheEntity>> {
        let document = self
            .media()
            .await
            .find_one(media_filter(&track_key))
            .await
            .map_err(|source| MongoDaoError::MediaEntry { track_key, source })?;
        Ok(document.map(|document| document.entry))
    }

    /// Compare-and-swap on `revision`; a lost race re-reads and re-applies the update.
    async fn update_media_entry(
        &self,
        track_key: String,
        update: MediaEntryUpdate,
    ) -> StorageResult<Option<MediaCacheEntity>> {
        let collection = self.media().await;
        let media_error = |source| MongoDaoError::MediaEntry {
            track_key: track_key.clone(),
            source,
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = collection
                .find_one(media_filter(&track_key))
                .await
                .map_err(media_error)?;
            let current_revision = current.as_ref().map(|document| document.revision);
            let Some(next) = update.apply(&track_key, current.map(|document| document.entry))
            else {
                return Ok(None);
            };

            let document = MongoMediaDocument::from(next.clone());
            let written = match current_revision {
                None => match collection.insert_one(&document).await {
                    Ok(_) => true,
                    Err(err) if is_duplicate_key(&err) => false,
                    Err(source) => return Err(media_error(source).into()),
                },
                Some(revision) => {
                    collection
                        .replace_one(revisioned_media_filter(&track_key, revision), &document)
                        .await
                        .map_err(media_error)?
                        .matched_count
                        > 0
                }
            };

            if written {
                return Ok(Some(next));
            }
        }

        Err(StorageError::conflict(format!("media entry `{track_key}`")))
    }

    async fn list_media_entries(&self) -> MongoResult<Vec<MediaCacheEntity>> {
        let documents: Vec<MongoMediaDocument> = self
            .media()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::MediaMaintenance { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::MediaMaintenance { source })?;

        Ok(documents
            .into_iter()
            .map(|document| document.entry)
            .collect())
    }

    async fn delete_media_entries(&self, track_keys: Vec<String>) -> MongoResult<usize> {
        if track_keys.is_empty() {
            return Ok(0);
        }
        let result = self
            .media()
            .await
            .delete_many(doc! { "_id": { "$in": track_keys } })
            .await
            .map_err(|source| MongoDaoError::MediaMaintenance { source })?;
        Ok(usize::try_from(result.deleted_count).unwrap_or(usize::MAX))
    }
}

impl GameStore for MongoGameStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await })
    }

    fn save_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session, expected_version).await })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session_by_code(code).await.map_err(Into::into) })
    }

    fn find_media_entry(
        &self,
        track_key: String,
    ) -> BoxFuture<'static, StorageResult<Option<MediaCacheEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_media_entry(track_key).await.map_err(Into::into) })
    }

    fn update_media_entry(
        &self,
        track_key: String,
        update: MediaEntryUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<MediaCacheEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.update_media_entry(track_key, update).await })
    }

    fn list_media_entries(&self) -> BoxFuture<'static, StorageResult<Vec<MediaCacheEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_media_entries().await.map_err(Into::into) })
    }

    fn delete_media_entries(
        &self,
        track_keys: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_media_entries(track_keys)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
