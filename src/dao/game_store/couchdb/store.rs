use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    game_store::{GameStore, MAX_CAS_ATTEMPTS},
    models::{MediaCacheEntity, MediaEntryUpdate, SessionEntity},
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, CouchMediaDocument, CouchSessionCodeDocument, CouchSessionDocument,
        END_SUFFIX, MEDIA_PREFIX, WriteResponse, media_doc_id, session_code_doc_id,
        session_doc_id,
    },
};

/// CouchDB-backed [`GameStore`] talking to the HTTP document API.
#[derive(Clone)]
pub struct CouchGameStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchGameStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            database: Arc::from(config.database),
            auth: config
                .username
                .zip(config.password)
                .map(|(user, pass)| (Arc::from(user), Arc::from(pass))),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412: another instance created it in between.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_owned(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    /// Write a document. Returns the new revision, or `None` when CouchDB reports a conflict.
    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<Option<String>>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(None),
            status if status.is_success() => response
                .json::<WriteResponse>()
                .await
                .map(|written| Some(written.rev))
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_owned(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<bool> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_owned(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => Ok(false),
            status if status.is_success() => Ok(true),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_owned()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_owned(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_owned(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_owned(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc.map(|doc| (row.id, doc)))
            .map(|(id, doc)| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue { path: id, source })
            })
            .collect()
    }

    async fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        let code = session.code.clone();
        let code_doc = CouchSessionCodeDocument {
            id: session_code_doc_id(&code),
            rev: None,
            session_id: session.id,
        };
        let Some(code_rev) = self.put_document(&code_doc.id, &code_doc).await? else {
            return Err(StorageError::conflict(format!("session code `{code}`")));
        };

        let document = CouchSessionDocument::from((session, None));
        match self.put_document(&document.id, &document).await {
            Ok(Some(_)) => Ok(()),
            outcome => {
                // Release the code reservation so it does not dangle.
                if let Err(err) = self.delete_document(&code_doc.id, &code_rev).await {
                    warn!(error = %err, code = %code, "failed to release session code");
                }
                match outcome {
                    Ok(_) => Err(StorageError::conflict(format!("session `{}`", document.id))),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    async fn save_session(&self, session: SessionEntity, expected_version: u64) -> StorageResult<()> {
        let doc_id = session_doc_id(session.id);
        let Some(existing) = self.get_document::<CouchSessionDocument>(&doc_id).await? else {
            return Err(StorageError::conflict(format!("session `{}`", session.id)));
        };
        if existing.session.version != expected_version {
            debug!(
                session_id = %session.id,
                expected_version,
                stored_version = existing.session.version,
                "stale session write rejected"
            );
            return Err(StorageError::conflict(format!("session `{}`", session.id)));
        }

        let document = CouchSessionDocument::from((session, existing.rev));
        match self.put_document(&doc_id, &document).await? {
            Some(_) => Ok(()),
            None => Err(StorageError::conflict(format!("session `{}`", document.session.id))),
        }
    }

    async fn find_session(&self, id: Uuid) -> CouchResult<Option<SessionEntity>> {
        let document = self
            .get_document::<CouchSessionDocument>(&session_doc_id(id))
            .await?;
        Ok(document.map(|document| document.session))
    }

    async fn find_session_by_code(&self, code: String) -> CouchResult<Option<SessionEntity>> {
        let Some(index) = self
            .get_document::<CouchSessionCodeDocument>(&session_code_doc_id(&code))
            .await?
        else {
            return Ok(None);
        };

        let session = self.find_session(index.session_id).await?;
        if session.is_none() {
            warn!(code = %code, session_id = %index.session_id, "session code points at a missing session");
        }
        Ok(session)
    }

    async fn update_media_entry(
        &self,
        track_key: String,
        update: MediaEntryUpdate,
    ) -> StorageResult<Option<MediaCacheEntity>> {
        let doc_id = media_doc_id(&track_key);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (rev, current) = match self.get_document::<CouchMediaDocument>(&doc_id).await? {
                Some(document) => (document.rev, Some(document.entry)),
                None => (None, None),
            };
            let Some(next) = update.apply(&track_key, current) else {
                return Ok(None);
            };

            let document = CouchMediaDocument::from((next.clone(), rev));
            if self.put_document(&doc_id, &document).await?.is_some() {
                return Ok(Some(next));
            }
        }

        Err(StorageError::conflict(format!("media entry `{track_key}`")))
    }

    async fn delete_media_entries(&self, track_keys: Vec<String>) -> CouchResult<usize> {
        let mut deleted = 0;
        for track_key in track_keys {
            let doc_id = media_doc_id(&track_key);
            let Some(document) = self.get_document::<CouchMediaDocument>(&doc_id).await? else {
                continue;
            };
            let Some(rev) = document.rev else {
                continue;
            };
            if self.delete_document(&doc_id, &rev).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

impl GameStore for CouchGameStore {
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
        Box::pin(async move {
            let document = store
                .get_document::<CouchMediaDocument>(&media_doc_id(&track_key))
                .await?;
            Ok(document.map(|document| document.entry))
        })
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
        Box::pin(async move {
            let documents = store
                .list_documents::<CouchMediaDocument>(MEDIA_PREFIX)
                .await?;
            Ok(documents
                .into_iter()
                .map(|document| document.entry)
                .collect())
        })
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
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
