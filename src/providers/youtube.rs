//! YouTube Data API v3 `search.list` client.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ProviderError, ProviderResult, VideoSearchItem, VideoSearchProvider};

const PROVIDER: &str = "youtube";
const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
/// YouTube category id for "Music".
pub const MUSIC_CATEGORY: &str = "10";
const QUOTA_REASONS: [&str; 3] = ["quotaExceeded", "dailyLimitExceeded", "rateLimitExceeded"];

/// Video search against YouTube.
#[derive(Clone)]
pub struct YoutubeClient {
    client: Client,
    api_key: Option<Arc<str>>,
    search_url: Arc<str>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: ResultId,
    snippet: Option<Snippet>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultId {
    video_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_title: String,
    published_at: Option<String>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl YoutubeClient {
    /// Build a client; without an API key every search fails with `NotConfigured`.
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ProviderError::Request {
                provider: PROVIDER,
                source,
            })?;

        Ok(Self {
            client,
            api_key: api_key
                .filter(|key| !key.trim().is_empty())
                .map(Arc::from),
            search_url: Arc::from(SEARCH_URL),
        })
    }

    async fn search(
        &self,
        query: String,
        category: Option<&'static str>,
        max_results: u32,
    ) -> ProviderResult<Vec<VideoSearchItem>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::NotConfigured { provider: PROVIDER });
        };

        let mut params = vec![
            ("part", "snippet".to_owned()),
            ("type", "video".to_owned()),
            ("q", query.clone()),
            ("maxResults", max_results.to_string()),
            ("key", api_key.to_owned()),
        ];
        if let Some(category) = category {
            params.push(("videoCategoryId", category.to_owned()));
        }

        let response = self
            .client
            .get(self.search_url.as_ref())
            .query(&params)
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    ProviderError::Timeout { provider: PROVIDER }
                } else {
                    ProviderError::Request {
                        provider: PROVIDER,
                        source,
                    }
                }
            })?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.json::<ErrorResponse>().await.ok();
            let quota = status == StatusCode::TOO_MANY_REQUESTS
                || body.is_some_and(|body| {
                    body.error
                        .errors
                        .iter()
                        .any(|detail| QUOTA_REASONS.contains(&detail.reason.as_str()))
                });
            if quota {
                warn!(query = %query, "YouTube quota exhausted");
                return Err(ProviderError::QuotaExceeded { provider: PROVIDER });
            }
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status,
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status,
            });
        }

        let payload =
            response
                .json::<SearchResponse>()
                .await
                .map_err(|source| ProviderError::Decode {
                    provider: PROVIDER,
                    source,
                })?;

        let items = payload
            .items
            .into_iter()
            .filter_map(|result| {
                let id = result.id.video_id?;
                let snippet = result.snippet?;
                let thumbnail = snippet
                    .thumbnails
                    .and_then(|thumbs| thumbs.high.or(thumbs.medium).or(thumbs.default))
                    .map(|thumb| thumb.url);
                Some(VideoSearchItem {
                    id,
                    title: unescape_html(&snippet.title),
                    thumbnail,
                    channel_title: unescape_html(&snippet.channel_title),
                    published_at: snippet.published_at,
                })
            })
            .collect::<Vec<_>>();

        debug!(query = %query, results = items.len(), "YouTube search completed");
        Ok(items)
    }
}

impl VideoSearchProvider for YoutubeClient {
    fn search(
        &self,
        query: String,
        category: Option<&'static str>,
        max_results: u32,
    ) -> BoxFuture<'static, ProviderResult<Vec<VideoSearchItem>>> {
        let client = self.clone();
        Box::pin(async move { client.search(query, category, max_results).await })
    }
}

/// Snippet titles come back HTML-escaped.
fn unescape_html(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
