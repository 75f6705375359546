//! Shared types for the external music providers and the fan-out used by search.

use std::{collections::HashSet, str::FromStr};

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::{
    errors::RouteError, jam_types::TrackSource, jamendo::Jamendo, lastfm::LastFm,
    tastedive::TasteDive,
};
use crate::models::tracks::TrackWithArtist;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} is not configured")]
    NotConfigured { provider: &'static str },
    #[error("request to {provider} failed")]
    Request {
        provider: &'static str,
        source: reqwest::Error,
    },
    #[error("{provider} returned an error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub(crate) fn request(provider: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Request { provider, source }
    }

    /// 503 for a provider we have no credentials for, 502 when the provider itself failed.
    #[must_use]
    pub fn into_route_error(self) -> RouteError {
        let route_error = match &self {
            Self::NotConfigured { provider } => RouteError::new(StatusCode::SERVICE_UNAVAILABLE)
                .set_public_error_message(&format!("{provider} is not available")),
            Self::Request { provider, .. } | Self::Api { provider, .. } => {
                RouteError::new_bad_gateway()
                    .set_public_error_message(&format!("{provider} request failed"))
            }
        };
        route_error.set_source(self.into())
    }
}

/// A track as any provider describes it, normalized to one shape.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub source: TrackSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Set for tracks already in the local catalogue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<i32>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: Option<i32>,
    pub audio_url: Option<String>,
    pub cover_url: Option<String>,
}

impl From<TrackWithArtist> for SearchResult {
    fn from(value: TrackWithArtist) -> Self {
        let TrackWithArtist { track, artist } = value;
        Self {
            source: track.source,
            external_id: track.external_id,
            local_id: Some(track.id),
            title: track.title,
            artist: artist.name,
            album: track.album,
            duration_secs: track.duration_secs,
            audio_url: track.audio_url,
            cover_url: track.cover_url,
        }
    }
}

impl SearchResult {
    fn dedup_key(&self) -> String {
        format!(
            "{}\u{0}{}",
            self.artist.trim().to_lowercase(),
            self.title.trim().to_lowercase()
        )
    }
}

/// Concatenates provider batches in order, keeping the first result for each artist and title.
#[must_use]
pub fn merge_results(batches: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|result| seen.insert(result.dedup_key()))
        .collect()
}

/// Which sources a search should consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Jamendo,
    LastFm,
}

impl ProviderKind {
    pub const ALL: [Self; 3] = [Self::Local, Self::Jamendo, Self::LastFm];
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "jamendo" => Ok(Self::Jamendo),
            "lastfm" => Ok(Self::LastFm),
            other => Err(anyhow::anyhow!("unknown provider {other:?}")),
        }
    }
}

/// Parses a comma-separated provider list. `None` or an empty list means every provider.
///
/// # Errors
/// Fails on an unknown provider name.
pub fn parse_provider_list(raw: Option<&str>) -> anyhow::Result<Vec<ProviderKind>> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return Ok(ProviderKind::ALL.to_vec());
    };

    let mut kinds = Vec::new();
    for part in raw.split(',').filter(|part| !part.trim().is_empty()) {
        let kind: ProviderKind = part.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// The configured external providers. A provider without credentials is `None`.
pub struct Providers {
    pub jamendo: Option<Jamendo>,
    pub lastfm: Option<LastFm>,
    pub tastedive: Option<TasteDive>,
}

impl Providers {
    pub fn jamendo(&self) -> Result<&Jamendo, ProviderError> {
        self.jamendo
            .as_ref()
            .ok_or(ProviderError::NotConfigured { provider: "Jamendo" })
    }

    pub fn lastfm(&self) -> Result<&LastFm, ProviderError> {
        self.lastfm
            .as_ref()
            .ok_or(ProviderError::NotConfigured { provider: "Last.fm" })
    }

    pub fn tastedive(&self) -> Result<&TasteDive, ProviderError> {
        self.tastedive
            .as_ref()
            .ok_or(ProviderError::NotConfigured { provider: "TasteDive" })
    }

    /// Searches the external providers in `kinds` concurrently.
    /// Providers that fail or aren't configured contribute nothing.
    ///
    /// # Returns
    /// One batch per provider, Jamendo first.
    pub async fn search_external(
        &self,
        query: &str,
        limit: u32,
        kinds: &[ProviderKind],
    ) -> Vec<Vec<SearchResult>> {
        let jamendo = async {
            if !kinds.contains(&ProviderKind::Jamendo) {
                return Vec::new();
            }
            let result = match self.jamendo() {
                Ok(jamendo) => jamendo.search_tracks(query, limit).await,
                Err(e) => Err(e),
            };
            unwrap_or_log(result)
        };
        let lastfm = async {
            if !kinds.contains(&ProviderKind::LastFm) {
                return Vec::new();
            }
            let result = match self.lastfm() {
                Ok(lastfm) => lastfm.search_tracks(query, limit).await,
                Err(e) => Err(e),
            };
            unwrap_or_log(result)
        };

        let (jamendo, lastfm) = tokio::join!(jamendo, lastfm);
        vec![jamendo, lastfm]
    }
}

fn unwrap_or_log(result: Result<Vec<SearchResult>, ProviderError>) -> Vec<SearchResult> {
    match result {
        Ok(results) => results,
        Err(e @ ProviderError::NotConfigured { .. }) => {
            debug!("Skipping provider: {e}");
            Vec::new()
        }
        Err(e) => {
            warn!("Provider search failed: {e:?}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(source: TrackSource, artist: &str, title: &str) -> SearchResult {
        SearchResult {
            source,
            external_id: None,
            local_id: None,
            title: title.to_owned(),
            artist: artist.to_owned(),
            album: None,
            duration_secs: None,
            audio_url: None,
            cover_url: None,
        }
    }

    #[test]
    fn merge_keeps_first_duplicate() {
        let merged = merge_results(vec![
            vec![result(TrackSource::Local, "Tycho", "Awake")],
            vec![
                result(TrackSource::Jamendo, "tycho ", "AWAKE"),
                result(TrackSource::Jamendo, "Tycho", "Dive"),
            ],
            vec![result(TrackSource::LastFm, "Bonobo", "Kerala")],
        ]);

        let sources: Vec<(TrackSource, &str)> = merged
            .iter()
            .map(|r| (r.source, r.title.as_str()))
            .collect();
        assert_eq!(
            sources,
            vec![
                (TrackSource::Local, "Awake"),
                (TrackSource::Jamendo, "Dive"),
                (TrackSource::LastFm, "Kerala"),
            ]
        );
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_results(vec![Vec::new(), Vec::new()]).is_empty());
    }

    #[test]
    fn provider_list_defaults_to_everything() {
        assert_eq!(parse_provider_list(None).unwrap(), ProviderKind::ALL.to_vec());
        assert_eq!(parse_provider_list(Some(" ")).unwrap(), ProviderKind::ALL.to_vec());
    }

    #[test]
    fn provider_list_parses_and_dedups() {
        assert_eq!(
            parse_provider_list(Some("lastfm, local,lastfm")).unwrap(),
            vec![ProviderKind::LastFm, ProviderKind::Local]
        );
        assert!(parse_provider_list(Some("spotify")).is_err());
    }

    #[test]
    fn provider_errors_map_to_gateway_statuses() {
        let missing = ProviderError::NotConfigured { provider: "TasteDive" }.into_route_error();
        assert_eq!(missing.status(), StatusCode::SERVICE_UNAVAILABLE);

        let failed = ProviderError::Api {
            provider: "Jamendo",
            message: "boom".to_owned(),
        }
        .into_route_error();
        assert_eq!(failed.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unconfigured_providers_return_nothing() {
        let providers = Providers {
            jamendo: None,
            lastfm: None,
            tastedive: None,
        };
        let batches = providers
            .search_external("anything", 10, &ProviderKind::ALL)
            .await;
        assert!(batches.iter().all(Vec::is_empty));
    }
}
