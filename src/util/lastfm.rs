use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{formats::PreferMany, serde_as, DisplayFromStr, OneOrMany};
use url::Url;
use utoipa::ToSchema;

use super::{
    jam_types::TrackSource,
    providers::{ProviderError, SearchResult},
};

const PROVIDER: &str = "Last.fm";

/// Client for the [Last.fm](https://www.last.fm/api) web service.
pub struct LastFm {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

/// Last.fm answers errors with a 200 or a 4xx, both carrying this body.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Reply<T> {
    Error { error: i32, message: String },
    Ok(T),
}

#[derive(Deserialize, Debug, Clone)]
struct Image {
    #[serde(rename = "#text")]
    url: String,
}

/// Picks the largest non-empty image. Last.fm lists them small to large.
fn pick_image(images: &[Image]) -> Option<String> {
    images
        .iter()
        .rev()
        .find(|image| !image.url.is_empty())
        .map(|image| image.url.clone())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Deserialize, Debug)]
struct TrackSearchResponse {
    results: TrackSearchResults,
}

#[derive(Deserialize, Debug)]
struct TrackSearchResults {
    trackmatches: TrackMatches,
}

#[serde_as]
#[derive(Deserialize, Debug)]
struct TrackMatches {
    #[serde_as(as = "OneOrMany<_, PreferMany>")]
    #[serde(default)]
    track: Vec<TrackMatch>,
}

#[derive(Deserialize, Debug)]
struct TrackMatch {
    name: String,
    artist: String,
    #[serde(default)]
    mbid: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    image: Vec<Image>,
}

impl From<TrackMatch> for SearchResult {
    fn from(track: TrackMatch) -> Self {
        let cover_url = pick_image(&track.image);
        // Not every track has an MBID, the page URL is unique either way
        let external_id = non_empty(track.mbid).or_else(|| non_empty(track.url));
        Self {
            source: TrackSource::LastFm,
            external_id,
            local_id: None,
            title: track.name,
            artist: track.artist,
            album: None,
            duration_secs: None,
            audio_url: None,
            cover_url,
        }
    }
}

#[derive(Deserialize, Debug)]
struct TrackInfoResponse {
    track: TrackInfo,
}

#[serde_as]
#[derive(Deserialize, Debug)]
struct TrackInfo {
    name: String,
    #[serde(default)]
    mbid: String,
    #[serde(default)]
    url: String,
    /// Milliseconds, as a string
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    duration: Option<i64>,
    artist: NamedArtist,
    #[serde(default)]
    album: Option<TrackAlbum>,
}

#[derive(Deserialize, Debug)]
struct NamedArtist {
    name: String,
}

#[derive(Deserialize, Debug)]
struct TrackAlbum {
    title: String,
    #[serde(default)]
    image: Vec<Image>,
}

impl From<TrackInfo> for SearchResult {
    fn from(info: TrackInfo) -> Self {
        let (album, cover_url) = info.album.map_or((None, None), |album| {
            let cover = pick_image(&album.image);
            (non_empty(album.title), cover)
        });
        let duration_secs = info
            .duration
            .map(|ms| ms / 1000)
            .filter(|secs| *secs > 0)
            .and_then(|secs| i32::try_from(secs).ok());
        Self {
            source: TrackSource::LastFm,
            external_id: non_empty(info.mbid).or_else(|| non_empty(info.url)),
            local_id: None,
            title: info.name,
            artist: info.artist.name,
            album,
            duration_secs,
            audio_url: None,
            cover_url,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ArtistInfoResponse {
    artist: RawArtistInfo,
}

#[derive(Deserialize, Debug)]
struct RawArtistInfo {
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    image: Vec<Image>,
    stats: RawArtistStats,
    #[serde(default)]
    bio: Option<RawBio>,
}

#[serde_as]
#[derive(Deserialize, Debug)]
struct RawArtistStats {
    #[serde_as(as = "DisplayFromStr")]
    listeners: i64,
    #[serde_as(as = "DisplayFromStr")]
    playcount: i64,
}

#[derive(Deserialize, Debug)]
struct RawBio {
    #[serde(default)]
    summary: String,
}

/// Artist details from Last.fm.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtistInfo {
    pub name: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub listeners: i64,
    pub playcount: i64,
    pub summary: Option<String>,
}

impl From<RawArtistInfo> for ArtistInfo {
    fn from(raw: RawArtistInfo) -> Self {
        Self {
            image_url: pick_image(&raw.image),
            name: raw.name,
            url: non_empty(raw.url),
            listeners: raw.stats.listeners,
            playcount: raw.stats.playcount,
            summary: raw.bio.and_then(|bio| non_empty(bio.summary)),
        }
    }
}

fn unwrap_reply<T>(reply: Reply<T>) -> Result<T, ProviderError> {
    match reply {
        Reply::Ok(value) => Ok(value),
        Reply::Error { error, message } => Err(ProviderError::Api {
            provider: PROVIDER,
            message: format!("{message} (code {error})"),
        }),
    }
}

impl LastFm {
    /// # Errors
    /// Fails if `base_url` isn't a valid URL.
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            api_key: api_key.to_owned(),
        })
    }

    fn method_url(&self, method: &str, params: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("method", method)
            .append_pair("api_key", &self.api_key)
            .append_pair("format", "json")
            .extend_pairs(params);
        url
    }

    async fn call<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let reply: Reply<T> = self
            .http
            .get(url)
            .send()
            .await
            .map_err(ProviderError::request(PROVIDER))?
            .json()
            .await
            .map_err(ProviderError::request(PROVIDER))?;
        unwrap_reply(reply)
    }

    /// # Errors
    /// Fails if the request fails or Last.fm reports an error.
    pub async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchResult>, ProviderError> {
        let limit = limit.to_string();
        let response: TrackSearchResponse = self
            .call(self.method_url("track.search", &[("track", query), ("limit", &limit)]))
            .await?;
        Ok(response
            .results
            .trackmatches
            .track
            .into_iter()
            .map(SearchResult::from)
            .collect())
    }

    /// # Errors
    /// Fails if the request fails or Last.fm doesn't know the track.
    pub async fn track_info(&self, artist: &str, title: &str) -> Result<SearchResult, ProviderError> {
        let response: TrackInfoResponse = self
            .call(self.method_url(
                "track.getInfo",
                &[("artist", artist), ("track", title), ("autocorrect", "1")],
            ))
            .await?;
        Ok(response.track.into())
    }

    /// # Errors
    /// Fails if the request fails or Last.fm doesn't know the artist.
    pub async fn artist_info(&self, artist: &str) -> Result<ArtistInfo, ProviderError> {
        let response: ArtistInfoResponse = self
            .call(self.method_url("artist.getInfo", &[("artist", artist), ("autocorrect", "1")]))
            .await?;
        Ok(response.artist.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_search() {
        let body = r##"{"results": {"opensearch:totalResults": "2", "trackmatches": {"track": [
            {"name": "Kerala", "artist": "Bonobo", "url": "https://www.last.fm/music/Bonobo/_/Kerala",
             "listeners": "812345", "mbid": "",
             "image": [{"#text": "https://img/s.png", "size": "small"}, {"#text": "https://img/xl.png", "size": "extralarge"}]},
            {"name": "Cirrus", "artist": "Bonobo", "url": "https://www.last.fm/music/Bonobo/_/Cirrus",
             "listeners": "700000", "mbid": "5f3d2b6a-0000-4000-8000-000000000001", "image": []}
        ]}}}"##;
        let reply: Reply<TrackSearchResponse> = serde_json::from_str(body).unwrap();
        let results: Vec<SearchResult> = unwrap_reply(reply)
            .unwrap()
            .results
            .trackmatches
            .track
            .into_iter()
            .map(SearchResult::from)
            .collect();

        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].external_id.as_deref(),
            Some("https://www.last.fm/music/Bonobo/_/Kerala")
        );
        assert_eq!(results[0].cover_url.as_deref(), Some("https://img/xl.png"));
        assert_eq!(
            results[1].external_id.as_deref(),
            Some("5f3d2b6a-0000-4000-8000-000000000001")
        );
        assert_eq!(results[1].cover_url, None);
    }

    #[test]
    fn single_match_object_is_accepted() {
        let body = r#"{"results": {"trackmatches": {"track": {"name": "Only", "artist": "One"}}}}"#;
        let reply: Reply<TrackSearchResponse> = serde_json::from_str(body).unwrap();
        assert_eq!(unwrap_reply(reply).unwrap().results.trackmatches.track.len(), 1);
    }

    #[test]
    fn error_body_becomes_api_error() {
        let reply: Reply<TrackInfoResponse> =
            serde_json::from_str(r#"{"error": 6, "message": "Track not found", "links": []}"#)
                .unwrap();
        let err = unwrap_reply(reply).unwrap_err();
        assert_eq!(err.to_string(), "Last.fm returned an error: Track not found (code 6)");
    }

    #[test]
    fn track_info_converts_milliseconds() {
        let body = r##"{"track": {"name": "Kerala", "mbid": "", "url": "https://www.last.fm/music/Bonobo/_/Kerala",
            "duration": "241000", "artist": {"name": "Bonobo"},
            "album": {"title": "Migration", "image": [{"#text": "https://img/l.png", "size": "large"}]}}}"##;
        let reply: Reply<TrackInfoResponse> = serde_json::from_str(body).unwrap();
        let result: SearchResult = unwrap_reply(reply).unwrap().track.into();

        assert_eq!(result.duration_secs, Some(241));
        assert_eq!(result.album.as_deref(), Some("Migration"));
        assert_eq!(result.cover_url.as_deref(), Some("https://img/l.png"));
    }

    #[test]
    fn parses_artist_info() {
        let body = r##"{"artist": {"name": "Bonobo", "url": "https://www.last.fm/music/Bonobo",
            "image": [{"#text": "", "size": "small"}],
            "stats": {"listeners": "2100000", "playcount": "98000000"},
            "bio": {"summary": "Simon Green is a British musician."}}}"##;
        let reply: Reply<ArtistInfoResponse> = serde_json::from_str(body).unwrap();
        let info: ArtistInfo = unwrap_reply(reply).unwrap().artist.into();

        assert_eq!(info.listeners, 2_100_000);
        assert_eq!(info.playcount, 98_000_000);
        assert_eq!(info.image_url, None);
        assert!(info.summary.unwrap().starts_with("Simon Green"));
    }

    #[test]
    fn method_url_carries_key_and_format() {
        let client = LastFm::new(
            reqwest::Client::new(),
            "https://ws.audioscrobbler.com/2.0/",
            "key",
        )
        .unwrap();
        let url = client.method_url("track.search", &[("track", "kerala")]);
        assert_eq!(
            url.as_str(),
            "https://ws.audioscrobbler.com/2.0/?method=track.search&api_key=key&format=json&track=kerala"
        );
    }
}
