use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use super::providers::ProviderError;

const PROVIDER: &str = "TasteDive";

/// Client for the [TasteDive](https://tastedive.com/read/api) recommendation API.
pub struct TasteDive {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

/// An artist TasteDive considers similar.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimilarArtist {
    pub name: String,
    pub description: Option<String>,
    pub wikipedia_url: Option<String>,
    pub youtube_url: Option<String>,
}

// The API has served both capitalized and lowercase keys over the years
#[derive(Deserialize, Debug)]
struct SimilarResponse {
    #[serde(alias = "Similar")]
    similar: Option<SimilarBody>,
    #[serde(default, alias = "Error")]
    error: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SimilarBody {
    #[serde(default, alias = "Results")]
    results: Vec<RawSimilar>,
}

#[derive(Deserialize, Debug)]
struct RawSimilar {
    #[serde(alias = "Name")]
    name: String,
    #[serde(default, alias = "Type")]
    r#type: Option<String>,
    #[serde(default, alias = "wTeaser", alias = "description")]
    teaser: Option<String>,
    #[serde(default, alias = "wUrl", alias = "wikipedia")]
    wiki_url: Option<String>,
    #[serde(default, alias = "yUrl", alias = "youtube")]
    youtube_url: Option<String>,
}

fn into_artists(response: SimilarResponse) -> Result<Vec<SimilarArtist>, ProviderError> {
    if let Some(message) = response.error {
        return Err(ProviderError::Api {
            provider: PROVIDER,
            message,
        });
    }

    Ok(response
        .similar
        .map(|body| body.results)
        .unwrap_or_default()
        .into_iter()
        .filter(|raw| raw.r#type.as_deref().is_none_or(|kind| kind == "music"))
        .map(|raw| SimilarArtist {
            name: raw.name,
            description: raw.teaser.filter(|s| !s.is_empty()),
            wikipedia_url: raw.wiki_url.filter(|s| !s.is_empty()),
            youtube_url: raw.youtube_url.filter(|s| !s.is_empty()),
        })
        .collect())
}

impl TasteDive {
    /// # Errors
    /// Fails if `base_url` isn't a valid URL.
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_owned(),
        })
    }

    fn similar_url(&self, query: &str, limit: u32) -> Url {
        let mut url = self
            .base_url
            .join("similar")
            .unwrap_or_else(|_| self.base_url.clone());
        url.query_pairs_mut()
            .append_pair("q", &format!("band:{query}"))
            .append_pair("type", "music")
            .append_pair("info", "1")
            .append_pair("limit", &limit.to_string())
            .append_pair("k", &self.api_key);
        url
    }

    /// Artists similar to `query`.
    ///
    /// # Errors
    /// Fails if the request fails or TasteDive reports an error.
    pub async fn similar_artists(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SimilarArtist>, ProviderError> {
        let response: SimilarResponse = self
            .http
            .get(self.similar_url(query, limit))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(ProviderError::request(PROVIDER))?
            .json()
            .await
            .map_err(ProviderError::request(PROVIDER))?;
        into_artists(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capitalized_response() {
        let body = r#"{"Similar": {
            "Info": [{"Name": "Bonobo", "Type": "music"}],
            "Results": [
                {"Name": "Tycho", "Type": "music", "wTeaser": "Scott Hansen is an American musician.",
                 "wUrl": "https://en.wikipedia.org/wiki/Tycho_(musician)", "yUrl": "", "yID": ""},
                {"Name": "Inception", "Type": "movie"}
            ]}}"#;
        let artists = into_artists(serde_json::from_str(body).unwrap()).unwrap();

        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name, "Tycho");
        assert!(artists[0].description.is_some());
        assert_eq!(artists[0].youtube_url, None);
    }

    #[test]
    fn parses_lowercase_response() {
        let body = r#"{"similar": {"results": [{"name": "Emancipator", "type": "music"}]}}"#;
        let artists = into_artists(serde_json::from_str(body).unwrap()).unwrap();
        assert_eq!(artists[0].name, "Emancipator");
    }

    #[test]
    fn error_body_is_an_error() {
        let response = serde_json::from_str(r#"{"error": "Invalid API key"}"#).unwrap();
        assert!(into_artists(response).is_err());
    }

    #[test]
    fn similar_url_prefixes_band() {
        let client =
            TasteDive::new(reqwest::Client::new(), "https://tastedive.com/api", "key").unwrap();
        let url = client.similar_url("Bonobo", 5);
        assert_eq!(url.path(), "/api/similar");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("q".to_owned(), "band:Bonobo".to_owned())));
        assert!(pairs.contains(&("k".to_owned(), "key".to_owned())));
    }
}
