//! Clients for the third-party search APIs the game depends on.
//!
//! Both providers sit behind object-safe traits so the media cache and the song search endpoint
//! can be exercised with in-process fakes.

pub mod itunes;
pub mod youtube;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Result alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failures reported by external search providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider refused the call because the API quota is exhausted.
    #[error("{provider} quota exhausted")]
    QuotaExceeded {
        /// Provider name.
        provider: &'static str,
    },
    /// The call did not complete within the configured bound.
    #[error("{provider} did not answer in time")]
    Timeout {
        /// Provider name.
        provider: &'static str,
    },
    /// No API key or endpoint was configured.
    #[error("{provider} is not configured")]
    NotConfigured {
        /// Provider name.
        provider: &'static str,
    },
    /// The HTTP request could not be sent.
    #[error("request to {provider} failed")]
    Request {
        /// Provider name.
        provider: &'static str,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The provider answered with an unexpected status.
    #[error("{provider} answered with status {status}")]
    Status {
        /// Provider name.
        provider: &'static str,
        /// HTTP status.
        status: StatusCode,
    },
    /// The response body could not be decoded.
    #[error("failed to decode {provider} response")]
    Decode {
        /// Provider name.
        provider: &'static str,
        /// Decoding error.
        #[source]
        source: reqwest::Error,
    },
}

impl ProviderError {
    /// Whether the failure is transient and the call may be retried later.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::NotConfigured { .. })
    }
}

/// One hit returned by the video search provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSearchItem {
    /// Provider video id.
    pub id: String,
    /// Upload title.
    pub title: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Uploading channel.
    pub channel_title: String,
    /// Publication timestamp as reported by the provider.
    pub published_at: Option<String>,
}

/// Video search collaborator used by the media resolver.
pub trait VideoSearchProvider: Send + Sync {
    /// Run one search query; `category` is a provider-specific hint.
    fn search(
        &self,
        query: String,
        category: Option<&'static str>,
        max_results: u32,
    ) -> BoxFuture<'static, ProviderResult<Vec<VideoSearchItem>>>;
}

/// One hit returned by the track search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TrackSearchItem {
    /// Provider track id.
    pub id: String,
    /// Track title.
    pub name: String,
    /// Performing artist.
    pub artist: String,
    /// Artwork URL.
    pub album_art: Option<String>,
    /// Album title.
    pub album: Option<String>,
}

/// Track metadata search used when players pick a song.
pub trait TrackSearchProvider: Send + Sync {
    /// Search tracks matching `query`.
    fn search(&self, query: String, limit: u32)
    -> BoxFuture<'static, ProviderResult<Vec<TrackSearchItem>>>;
}
