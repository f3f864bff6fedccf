use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

/// Server used when `MONGO_URI` is not provided.
const DEFAULT_URI: &str = "mongodb://localhost:27017";
/// Database used when `MONGO_DB` is not provided.
const DEFAULT_DATABASE: &str = "mixtape_party";

/// Runtime configuration describing how to connect to MongoDB.
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed driver options.
    pub options: ClientOptions,
    /// Target database.
    pub database_name: String,
    /// Pings attempted before giving up on a connection attempt.
    pub max_ping_attempts: u32,
}

impl MongoConfig {
    /// Parse a connection string, defaulting the database name.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let database_name = db_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_DATABASE)
            .to_owned();
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;
        if options.app_name.is_none() {
            options.app_name = Some(env!("CARGO_PKG_NAME").to_owned());
        }

        Ok(Self {
            options,
            database_name,
            max_ping_attempts: 5,
        })
    }

    /// Build a configuration from `MONGO_URI` (local server by default) and the optional `MONGO_DB`.
    pub async fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI").unwrap_or_else(|_| DEFAULT_URI.to_owned());
        let db = std::env::var("MONGO_DB").ok();
        Self::from_uri(&uri, db.as_deref()).await
    }
}
