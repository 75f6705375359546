use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use url::Url;

use super::{
    jam_types::TrackSource,
    providers::{ProviderError, SearchResult},
};

const PROVIDER: &str = "Jamendo";

/// Client for the [Jamendo](https://developer.jamendo.com/v3.0) track API.
pub struct Jamendo {
    http: reqwest::Client,
    base_url: Url,
    client_id: String,
}

#[derive(Deserialize, Debug)]
struct JamendoResponse {
    headers: JamendoHeaders,
    #[serde(default)]
    results: Vec<JamendoTrack>,
}

#[derive(Deserialize, Debug)]
struct JamendoHeaders {
    status: String,
    #[serde(default)]
    error_message: String,
}

#[serde_as]
#[derive(Deserialize, Debug)]
struct JamendoTrack {
    #[serde_as(as = "DisplayFromStr")]
    id: u64,
    name: String,
    #[serde(default)]
    duration: Option<i32>,
    artist_name: String,
    #[serde(default)]
    album_name: Option<String>,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

impl From<JamendoTrack> for SearchResult {
    fn from(track: JamendoTrack) -> Self {
        Self {
            source: TrackSource::Jamendo,
            external_id: Some(track.id.to_string()),
            local_id: None,
            title: track.name,
            artist: track.artist_name,
            album: track.album_name.filter(|album| !album.is_empty()),
            duration_secs: track.duration.filter(|d| *d > 0),
            audio_url: track.audio.filter(|url| !url.is_empty()),
            cover_url: track.image.filter(|url| !url.is_empty()),
        }
    }
}

fn into_results(response: JamendoResponse) -> Result<Vec<SearchResult>, ProviderError> {
    if response.headers.status != "success" {
        return Err(ProviderError::Api {
            provider: PROVIDER,
            message: response.headers.error_message,
        });
    }
    Ok(response.results.into_iter().map(SearchResult::from).collect())
}

impl Jamendo {
    /// # Errors
    /// Fails if `base_url` isn't a valid URL.
    pub fn new(http: reqwest::Client, base_url: &str, client_id: &str) -> anyhow::Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self {
            http,
            base_url,
            client_id: client_id.to_owned(),
        })
    }

    fn tracks_url(&self, params: &[(&str, &str)]) -> Url {
        let mut url = self
            .base_url
            .join("tracks/")
            .unwrap_or_else(|_| self.base_url.clone());
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("format", "json")
            .append_pair("audioformat", "mp32")
            .extend_pairs(params);
        url
    }

    async fn fetch(&self, url: Url) -> Result<Vec<SearchResult>, ProviderError> {
        let response: JamendoResponse = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(ProviderError::request(PROVIDER))?
            .json()
            .await
            .map_err(ProviderError::request(PROVIDER))?;
        into_results(response)
    }

    /// Full-text track search.
    ///
    /// # Errors
    /// Fails if the request fails or Jamendo reports an error.
    pub async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let limit = limit.to_string();
        self.fetch(self.tracks_url(&[("search", query), ("limit", &limit)]))
            .await
    }

    /// Looks up a single track by its Jamendo ID.
    ///
    /// # Errors
    /// Fails if the request fails or Jamendo reports an error.
    pub async fn track_by_id(&self, id: &str) -> Result<Option<SearchResult>, ProviderError> {
        Ok(self
            .fetch(self.tracks_url(&[("id", id)]))
            .await?
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "headers": {"status": "success", "code": 0, "error_message": "", "warnings": "", "results_count": 2},
        "results": [
            {"id": "1532771", "name": "Shades of Blue", "duration": 215, "artist_id": "7903",
             "artist_name": "Hotel Neon", "album_name": "Coastline", "album_image": "",
             "audio": "https://prod-1.storage.jamendo.com/?trackid=1532771&format=mp31",
             "image": "https://usercontent.jamendo.com?type=album&id=1&width=300"},
            {"id": "99", "name": "Untitled", "duration": 0, "artist_name": "Nobody",
             "album_name": "", "audio": "", "image": ""}
        ]
    }"#;

    fn client() -> Jamendo {
        Jamendo::new(reqwest::Client::new(), "https://api.jamendo.com/v3.0", "abc123").unwrap()
    }

    #[test]
    fn parses_and_normalizes_tracks() {
        let response: JamendoResponse = serde_json::from_str(SAMPLE).unwrap();
        let results = into_results(response).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, TrackSource::Jamendo);
        assert_eq!(results[0].external_id.as_deref(), Some("1532771"));
        assert_eq!(results[0].artist, "Hotel Neon");
        assert_eq!(results[0].album.as_deref(), Some("Coastline"));
        assert_eq!(results[0].duration_secs, Some(215));

        // Empty strings and zero durations mean "unknown"
        assert_eq!(results[1].album, None);
        assert_eq!(results[1].duration_secs, None);
        assert_eq!(results[1].audio_url, None);
    }

    #[test]
    fn failed_status_is_an_error() {
        let response: JamendoResponse = serde_json::from_str(
            r#"{"headers": {"status": "failed", "code": 5, "error_message": "Your credential is suspended"}, "results": []}"#,
        )
        .unwrap();
        let err = into_results(response).unwrap_err();
        assert!(matches!(err, ProviderError::Api { message, .. } if message.contains("suspended")));
    }

    #[test]
    fn builds_search_url() {
        let url = client().tracks_url(&[("search", "lo fi"), ("limit", "5")]);
        assert_eq!(url.path(), "/v3.0/tracks/");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_owned(), "abc123".to_owned())));
        assert!(pairs.contains(&("search".to_owned(), "lo fi".to_owned())));
        assert!(pairs.contains(&("limit".to_owned(), "5".to_owned())));
    }
}
