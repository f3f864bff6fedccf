//! iTunes Search API client used for song lookups.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;

use super::{ProviderError, ProviderResult, TrackSearchItem, TrackSearchProvider};

const PROVIDER: &str = "itunes";
const SEARCH_URL: &str = "https://itunes.apple.com/search";
const MAX_LIMIT: u32 = 50;

/// Track search against the public iTunes catalog.
#[derive(Clone)]
pub struct ItunesClient {
    client: Client,
    search_url: Arc<str>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ItunesTrack>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItunesTrack {
    track_id: Option<u64>,
    track_name: Option<String>,
    artist_name: Option<String>,
    collection_name: Option<String>,
    artwork_url100: Option<String>,
}

impl ItunesTrack {
    fn into_item(self) -> Option<TrackSearchItem> {
        Some(TrackSearchItem {
            id: self.track_id?.to_string(),
            name: self.track_name?,
            artist: self.artist_name?,
            // 100px artwork is tiny on TVs; the CDN serves any size for the same path.
            album_art: self
                .artwork_url100
                .map(|url| url.replace("100x100bb", "600x600bb")),
            album: self.collection_name,
        })
    }
}

impl ItunesClient {
    /// Build a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ProviderError::Request {
                provider: PROVIDER,
                source,
            })?;
        Ok(Self {
            client,
            search_url: Arc::from(SEARCH_URL),
        })
    }

    async fn search(&self, query: String, limit: u32) -> ProviderResult<Vec<TrackSearchItem>> {
        let limit = limit.clamp(1, MAX_LIMIT).to_string();
        let response = self
            .client
            .get(self.search_url.as_ref())
            .query(&[
                ("term", query.as_str()),
                ("media", "music"),
                ("entity", "song"),
                ("limit", limit.as_str()),
            ])
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

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER,
                status: response.status(),
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

        Ok(payload
            .results
            .into_iter()
            .filter_map(ItunesTrack::into_item)
            .collect())
    }
}

impl TrackSearchProvider for ItunesClient {
    fn search(
        &self,
        query: String,
        limit: u32,
    ) -> BoxFuture<'static, ProviderResult<Vec<TrackSearchItem>>> {
        let client = self.clone();
        Box::pin(async move { client.search(query, limit).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_tracks_are_skipped() {
        let payload: SearchResponse = serde_json::from_str(
            r#"{"resultCount":2,"results":[
                {"trackId":1440857781,"trackName":"One More Time","artistName":"Daft Punk",
                 "collectionName":"Discovery","artworkUrl100":"https://example.test/a/100x100bb.jpg"},
                {"wrapperType":"audiobook","artistName":"Someone"}
            ]}"#,
        )
        .unwrap();

        let items = payload
            .results
            .into_iter()
            .filter_map(ItunesTrack::into_item)
            .collect::<Vec<_>>();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "1440857781");
        assert_eq!(items[0].album.as_deref(), Some("Discovery"));
        assert_eq!(
            items[0].album_art.as_deref(),
            Some("https://example.test/a/600x600bb.jpg")
        );
    }
}
