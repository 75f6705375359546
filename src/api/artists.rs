use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    models::{artists::Artist, tracks::Track},
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        lastfm::ArtistInfo,
        query::{PageParams, Paginated},
        validator::ValidatedQuery,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_artists))
        .routes(routes!(get_artist))
        .routes(routes!(get_artist_info))
}

pub(super) async fn find_artist(
    id: i32,
    conn: &mut diesel_async::AsyncPgConnection,
) -> Result<Artist, RouteError> {
    use crate::schema::artists;

    artists::table
        .find(id)
        .first::<Artist>(conn)
        .await
        .optional()?
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("Artist not found"))
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
struct ArtistFilter {
    /// Case-insensitive substring of the artist name
    name: Option<String>,
}

/// List artists
#[utoipa::path(
    method(get),
    path = "/",
    params(ArtistFilter, PageParams),
    responses(
        (status = OK, description = "Success", body = Paginated<Artist>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_artists(
    State(state): State<AppState>,
    Query(filter): Query<ArtistFilter>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<Artist>>, RouteError> {
    use crate::schema::artists;

    let filtered = || {
        let mut query = artists::table.into_boxed();
        if let Some(name) = filter.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            query = query.filter(artists::name.ilike(format!("%{}%", escape_like(name))));
        }
        query
    };

    let mut conn = state.db.get().await?;
    let total: i64 = filtered().count().get_result(&mut conn).await?;
    let results: Vec<Artist> = filtered()
        .order(artists::name.asc())
        .offset(page.offset())
        .limit(page.limit())
        .load(&mut conn)
        .await?;

    Ok(Json(Paginated { results, total }))
}

/// Escapes `LIKE` wildcards so user input only matches literally.
pub(super) fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ArtistResponse {
    #[serde(flatten)]
    artist: Artist,
    tracks: Vec<Track>,
}

/// Get an artist and their tracks
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of artist to get"),
    ),
    responses(
        (status = OK, description = "Success", body = ArtistResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Artist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_artist(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ArtistResponse>, RouteError> {
    use crate::schema::tracks;

    let mut conn = state.db.get().await?;
    let artist = find_artist(id, &mut conn).await?;
    let tracks: Vec<Track> = Track::belonging_to(&artist)
        .order(tracks::created_at.desc())
        .load(&mut conn)
        .await?;

    Ok(Json(ArtistResponse { artist, tracks }))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ArtistInfoResponse {
    #[serde(flatten)]
    artist: Artist,
    /// Absent when Last.fm is unavailable or doesn't know the artist
    lastfm: Option<ArtistInfo>,
}

/// Get an artist merged with their Last.fm profile
#[utoipa::path(
    method(get),
    path = "/{id}/info",
    params(
        ("id" = i32, Path, description = "ID of artist"),
    ),
    responses(
        (status = OK, description = "Success", body = ArtistInfoResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Artist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_artist_info(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ArtistInfoResponse>, RouteError> {
    let mut conn = state.db.get().await?;
    let artist = find_artist(id, &mut conn).await?;
    drop(conn);

    let lastfm = match state.providers.lastfm() {
        Ok(lastfm) => lastfm
            .artist_info(&artist.name)
            .await
            .inspect_err(|e| warn!("Last.fm lookup for {:?} failed: {e}", artist.name))
            .ok(),
        Err(_) => None,
    };

    Ok(Json(ArtistInfoResponse { artist, lastfm }))
}

#[cfg(test)]
mod tests {
    use axum::{extract::Query, http::Uri};

    use super::{escape_like, ArtistFilter};

    #[test]
    fn name_filter_is_read_from_the_query() {
        let uri: Uri = "/api/artists?name=Bon&page=2".parse().unwrap();
        let Query(filter) = Query::<ArtistFilter>::try_from_uri(&uri).unwrap();
        assert_eq!(filter.name.as_deref(), Some("Bon"));
        assert!(format!("{filter:?}").contains("Bon"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("100% pure_rock"), "100\\% pure\\_rock");
        assert_eq!(escape_like("plain"), "plain");
    }
}
