use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Convenient result alias returning [`MongoDaoError`] failures.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures that can occur while interacting with MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Building the client from parsed options failed.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered the initial ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Number of pings sent.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// The periodic health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// An index could not be created.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Target collection.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Writing a session document failed.
    #[error("failed to save session `{id}`")]
    SaveSession {
        /// Session id.
        id: Uuid,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading a session document failed.
    #[error("failed to load session `{key}`")]
    LoadSession {
        /// Session id or join code.
        key: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Reading or writing a lookup cache entry failed.
    #[error("failed to access media cache entry `{track_key}`")]
    MediaEntry {
        /// Normalized track key.
        track_key: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Listing or deleting lookup cache entries failed.
    #[error("failed to run maintenance on the media cache")]
    MediaMaintenance {
        /// Driver error.
        #[source]
        source: MongoError,
    },
}
