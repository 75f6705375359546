use axum::{extract::State, Json};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tracing::{instrument, warn};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use super::artists::escape_like;
use crate::{
    models::{
        artists::Artist,
        tracks::{Track, TrackWithArtist},
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        providers::{merge_results, parse_provider_list, ProviderKind, SearchResult},
        tastedive::SimilarArtist,
        validator::ValidatedQuery,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(search))
        .routes(routes!(similar_artists))
}

#[serde_inline_default]
#[derive(Deserialize, Validate, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
struct SearchParams {
    /// Free-text query. Blank queries return nothing.
    #[serde(default)]
    #[validate(length(max = 200))]
    q: String,
    /// Comma-separated subset of `local`, `jamendo`, `lastfm`. Defaults to all of them.
    providers: Option<String>,
    /// Results per provider
    #[validate(range(min = 1, max = 50))]
    #[serde_inline_default(10)]
    limit: u32,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
}

/// Search the local catalogue and external providers
#[utoipa::path(
    method(get),
    path = "/",
    params(SearchParams),
    responses(
        (status = OK, description = "Success", body = SearchResponse, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn search(
    State(state): State<AppState>,
    ValidatedQuery(params): ValidatedQuery<SearchParams>,
) -> Result<Json<SearchResponse>, RouteError> {
    let query = params.q.trim().to_owned();
    if query.is_empty() {
        return Ok(Json(SearchResponse {
            query,
            results: Vec::new(),
        }));
    }

    let kinds = parse_provider_list(params.providers.as_deref()).map_err(|e| {
        RouteError::new_bad_request().set_public_error_message(&e.to_string())
    })?;

    let local = if kinds.contains(&ProviderKind::Local) {
        search_local(&state, &query, params.limit)
            .await
            .unwrap_or_else(|e| {
                warn!("Local catalogue search failed: {e:?}");
                Vec::new()
            })
    } else {
        Vec::new()
    };

    let mut batches = vec![local];
    batches.extend(
        state
            .providers
            .search_external(&query, params.limit, &kinds)
            .await,
    );

    Ok(Json(SearchResponse {
        query,
        results: merge_results(batches),
    }))
}

async fn search_local(
    state: &AppState,
    query: &str,
    limit: u32,
) -> anyhow::Result<Vec<SearchResult>> {
    use crate::schema::{artists, tracks};

    let pattern = format!("%{}%", escape_like(query));
    let mut conn = state.db.get().await?;
    let rows = tracks::table
        .inner_join(artists::table)
        .filter(
            tracks::title
                .ilike(pattern.as_str())
                .or(artists::name.ilike(pattern.as_str()))
                .or(tracks::album.ilike(pattern.as_str())),
        )
        .order((tracks::title.asc(), tracks::id.asc()))
        .select((Track::as_select(), Artist::as_select()))
        .limit(i64::from(limit))
        .load::<(Track, Artist)>(&mut conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| SearchResult::from(TrackWithArtist::from(row)))
        .collect())
}

#[serde_inline_default]
#[derive(Deserialize, Validate, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
struct SimilarParams {
    /// Artist to find similar artists for
    #[serde(default)]
    #[validate(length(max = 200))]
    q: String,
    #[validate(range(min = 1, max = 50))]
    #[serde_inline_default(10)]
    limit: u32,
}

/// Find artists similar to one you like, via TasteDive
#[utoipa::path(
    method(get),
    path = "/similar",
    params(SimilarParams),
    responses(
        (status = OK, description = "Success", body = Vec<SimilarArtist>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = BAD_GATEWAY, description = "TasteDive request failed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = SERVICE_UNAVAILABLE, description = "TasteDive not configured", body = SimpleRouteErrorOutput, content_type = "application/json")
    )
)]
#[instrument(skip(state), err(Debug))]
async fn similar_artists(
    State(state): State<AppState>,
    ValidatedQuery(params): ValidatedQuery<SimilarParams>,
) -> Result<Json<Vec<SimilarArtist>>, RouteError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let artists = state
        .providers
        .tastedive()
        .map_err(|e| e.into_route_error())?
        .similar_artists(query, params.limit)
        .await
        .map_err(|e| e.into_route_error())?;

    Ok(Json(artists))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::api::tests::{body_json, empty_request, send};

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        for uri in ["/api/search", "/api/search?q=", "/api/search?q=%20%20"] {
            let response = send(empty_request(Method::GET, uri)).await;
            assert_eq!(response.status(), StatusCode::OK, "{uri}");

            let body = body_json(response).await;
            assert_eq!(body["results"].as_array().unwrap().len(), 0, "{uri}");
        }
    }

    #[tokio::test]
    async fn unreachable_catalogue_is_skipped() {
        let response = send(empty_request(Method::GET, "/api/search?q=kerala")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["query"], "kerala");
        assert_eq!(body["results"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn blank_similar_query_is_an_empty_list() {
        let response = send(empty_request(Method::GET, "/api/search/similar?q=")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn similar_without_tastedive_is_unavailable() {
        let response = send(empty_request(Method::GET, "/api/search/similar?q=Bonobo")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn out_of_range_limit_is_rejected() {
        let response = send(empty_request(Method::GET, "/api/search?q=x&limit=500")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let response =
            send(empty_request(Method::GET, "/api/search?q=x&providers=spotify")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
