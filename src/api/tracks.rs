use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::{Validate, ValidationError};

use crate::{
    models::{
        activities::NewActivity,
        artists::{Artist, NewArtist},
        likes::TrackLike,
        stream_events::{NewStreamEvent, StreamEvent},
        tracks::{NewTrack, Track, TrackWithArtist},
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jam_types::{ActivityKind, TrackSource},
        jwt::Claims,
        providers::{ProviderKind, SearchResult},
        query::{PageParams, Paginated, SortType},
        trending,
        validator::{ValidatedJson, ValidatedQuery},
        week::WeekKey,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_tracks))
        .routes(routes!(import_track))
        .routes(routes!(get_track, delete_track))
        .routes(routes!(toggle_like))
        .routes(routes!(record_stream))
}

pub(super) async fn find_track(id: i32, conn: &mut AsyncPgConnection) -> Result<Track, RouteError> {
    use crate::schema::tracks;

    tracks::table
        .find(id)
        .first::<Track>(conn)
        .await
        .optional()?
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("Track not found"))
}

pub(super) async fn find_track_with_artist(
    id: i32,
    conn: &mut AsyncPgConnection,
) -> Result<TrackWithArtist, RouteError> {
    use crate::schema::{artists, tracks};

    tracks::table
        .inner_join(artists::table)
        .filter(tracks::id.eq(id))
        .select((Track::as_select(), Artist::as_select()))
        .first::<(Track, Artist)>(conn)
        .await
        .optional()?
        .map(TrackWithArtist::from)
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("Track not found"))
}

#[derive(Deserialize, Debug, Clone, Copy, ToSchema)]
#[serde(rename_all = "camelCase")]
enum TrackSortKey {
    CreatedAt,
    Title,
}

#[derive(Deserialize, Debug, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
struct TrackFilter {
    artist_id: Option<i32>,
    source: Option<TrackSource>,
    /// Defaults to `createdAt`
    sort_by: Option<TrackSortKey>,
    /// Defaults to `desc`
    order: Option<SortType>,
}

/// List tracks
#[utoipa::path(
    method(get),
    path = "/",
    params(TrackFilter, PageParams),
    responses(
        (status = OK, description = "Success", body = Paginated<TrackWithArtist>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_tracks(
    State(state): State<AppState>,
    Query(filter): Query<TrackFilter>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<TrackWithArtist>>, RouteError> {
    use crate::schema::{artists, tracks};

    let filtered = || {
        let mut query = tracks::table.inner_join(artists::table).into_boxed();
        if let Some(artist_id) = filter.artist_id {
            query = query.filter(tracks::artist_id.eq(artist_id));
        }
        if let Some(source) = filter.source {
            query = query.filter(tracks::source.eq(source));
        }
        query
    };

    let mut conn = state.db.get().await?;
    let total: i64 = filtered().count().get_result(&mut conn).await?;

    let mut query = filtered();
    query = match (
        filter.sort_by.unwrap_or(TrackSortKey::CreatedAt),
        filter.order.unwrap_or(SortType::Desc),
    ) {
        (TrackSortKey::CreatedAt, SortType::Asc) => query.order(tracks::created_at.asc()),
        (TrackSortKey::CreatedAt, SortType::Desc) => query.order(tracks::created_at.desc()),
        (TrackSortKey::Title, SortType::Asc) => query.order(tracks::title.asc()),
        (TrackSortKey::Title, SortType::Desc) => query.order(tracks::title.desc()),
    };

    let results: Vec<(Track, Artist)> = query
        .then_order_by(tracks::id.asc())
        .select((Track::as_select(), Artist::as_select()))
        .offset(page.offset())
        .limit(page.limit())
        .load(&mut conn)
        .await?;

    Ok(Json(Paginated {
        results: results.into_iter().map(TrackWithArtist::from).collect(),
        total,
    }))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct TrackResponse {
    #[serde(flatten)]
    track: TrackWithArtist,
    likes: i64,
    /// Only present for authenticated callers
    #[serde(skip_serializing_if = "Option::is_none")]
    liked: Option<bool>,
}

/// Get a track
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of track to get"),
    ),
    responses(
        (status = OK, description = "Success", body = TrackResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Track not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        (),
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), err(Debug))]
async fn get_track(
    State(state): State<AppState>,
    claims: Option<Claims>,
    Path(id): Path<i32>,
) -> Result<Json<TrackResponse>, RouteError> {
    let mut conn = state.db.get().await?;
    let track = find_track_with_artist(id, &mut conn).await?;
    let likes = track.track.like_count(&mut conn).await?;
    let liked = match claims {
        Some(claims) => Some(TrackLike::exists(claims.profile.id, id, &mut conn).await?),
        None => None,
    };

    Ok(Json(TrackResponse {
        track,
        likes,
        liked,
    }))
}

/// Delete a track
#[utoipa::path(
    method(delete),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of track to delete"),
    ),
    responses(
        (status = OK, description = "Success"),
        (status = NOT_FOUND, description = "Track not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not the uploader or staff", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn delete_track(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<(), RouteError> {
    use crate::schema::tracks;

    let mut conn = state.db.get().await?;
    let track = find_track(id, &mut conn).await?;

    let is_staff = claims.is_staff(&mut conn).await?;
    if !track.user_can_delete(claims.profile.id, is_staff) {
        return Err(RouteError::new_forbidden()
            .set_public_error_message("Only the uploader or staff can delete this track"));
    }

    diesel::delete(tracks::table.find(id))
        .execute(&mut conn)
        .await?;
    info!(track_id = id, "Deleted track");

    Ok(())
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct LikeResponse {
    liked: bool,
    likes: i64,
}

/// Like or unlike a track
#[utoipa::path(
    method(post),
    path = "/{id}/like",
    params(
        ("id" = i32, Path, description = "ID of track to (un)like"),
    ),
    responses(
        (status = OK, description = "Success", body = LikeResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Track not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn toggle_like(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<Json<LikeResponse>, RouteError> {
    let mut conn = state.db.get().await?;
    let track = find_track(id, &mut conn).await?;

    let liked = TrackLike::toggle(claims.profile.id, id, &mut conn).await?;
    if liked {
        NewActivity::track(claims.profile.id, ActivityKind::LikedTrack, id)
            .record_or_warn(&mut conn, &state.live)
            .await;
    }
    let likes = track.like_count(&mut conn).await?;

    Ok(Json(LikeResponse { liked, likes }))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct StreamRequest {
    /// Seconds actually listened
    #[validate(range(min = 0, max = 86400))]
    duration_played_secs: i32,
}

/// Record a play of a track
#[utoipa::path(
    method(post),
    path = "/{id}/stream",
    params(
        ("id" = i32, Path, description = "ID of track played"),
    ),
    request_body = StreamRequest,
    responses(
        (status = OK, description = "Success", body = StreamEvent, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Track not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        (),
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), err(Debug))]
async fn record_stream(
    State(state): State<AppState>,
    claims: Option<Claims>,
    Path(id): Path<i32>,
    ValidatedJson(payload): ValidatedJson<StreamRequest>,
) -> Result<Json<StreamEvent>, RouteError> {
    let mut conn = state.db.get().await?;
    find_track(id, &mut conn).await?;

    let event = NewStreamEvent {
        track_id: id,
        user_id: claims.map(|claims| claims.profile.id),
        duration_played_secs: payload.duration_played_secs,
    }
    .insert(&mut conn)
    .await?;

    // The stream row is the record, the live counter can lag behind it
    if let Err(e) =
        trending::record_stream(&state.redis, WeekKey::containing(event.streamed_at), id).await
    {
        warn!(track_id = id, "Failed to bump trending counter: {e:?}");
    }

    Ok(Json(event))
}

fn validate_import(request: &ImportRequest) -> Result<(), ValidationError> {
    let has = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
    match request.provider {
        ProviderKind::Jamendo if !has(&request.external_id) => Err(ValidationError::new(
            "jamendo_needs_external_id",
        )
        .with_message("Jamendo imports need externalId".into())),
        ProviderKind::LastFm if !has(&request.artist) || !has(&request.title) => Err(
            ValidationError::new("lastfm_needs_artist_and_title")
                .with_message("Last.fm imports need artist and title".into()),
        ),
        ProviderKind::Local => Err(ValidationError::new("local_import")
            .with_message("Local tracks are uploaded, not imported".into())),
        _ => Ok(()),
    }
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_import"))]
struct ImportRequest {
    provider: ProviderKind,
    #[validate(length(max = 128))]
    external_id: Option<String>,
    #[validate(length(max = 256))]
    artist: Option<String>,
    #[validate(length(max = 256))]
    title: Option<String>,
}

/// Saves a provider result as a local track. Importing the same provider track twice returns the first row.
async fn save_import(
    result: &SearchResult,
    user_id: i32,
    conn: &mut AsyncPgConnection,
) -> Result<TrackWithArtist, RouteError> {
    let artist = NewArtist::new(&result.artist).find_or_create(conn).await?;
    let track = NewTrack {
        title: &result.title,
        artist_id: artist.id,
        album: result.album.as_deref(),
        duration_secs: result.duration_secs,
        audio_url: result.audio_url.as_deref(),
        cover_url: result.cover_url.as_deref(),
        source: result.source,
        external_id: result.external_id.as_deref(),
        uploaded_by: Some(user_id),
    }
    .insert_or_existing(conn)
    .await?;

    Ok(TrackWithArtist { track, artist })
}

/// Import a track from Jamendo or Last.fm
#[utoipa::path(
    method(post),
    path = "/import",
    request_body = ImportRequest,
    responses(
        (status = OK, description = "Success", body = TrackWithArtist, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Provider doesn't know the track", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = BAD_GATEWAY, description = "Provider request failed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = SERVICE_UNAVAILABLE, description = "Provider not configured", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn import_track(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<ImportRequest>,
) -> Result<Json<TrackWithArtist>, RouteError> {
    let result = match payload.provider {
        ProviderKind::Jamendo => {
            let external_id = payload.external_id.as_deref().unwrap_or_default().trim();
            state
                .providers
                .jamendo()
                .map_err(|e| e.into_route_error())?
                .track_by_id(external_id)
                .await
                .map_err(|e| e.into_route_error())?
                .ok_or_else(|| {
                    RouteError::new_not_found().set_public_error_message("Jamendo has no such track")
                })?
        }
        ProviderKind::LastFm => state
            .providers
            .lastfm()
            .map_err(|e| e.into_route_error())?
            .track_info(
                payload.artist.as_deref().unwrap_or_default().trim(),
                payload.title.as_deref().unwrap_or_default().trim(),
            )
            .await
            .map_err(|e| e.into_route_error())?,
        ProviderKind::Local => {
            return Err(RouteError::new_bad_request()
                .set_public_error_message("Local tracks are uploaded, not imported"))
        }
    };

    let mut conn = state.db.get().await?;
    let imported = save_import(&result, claims.profile.id, &mut conn).await?;
    NewActivity::track(claims.profile.id, ActivityKind::ImportedTrack, imported.track.id)
        .record_or_warn(&mut conn, &state.live)
        .await;

    Ok(Json(imported))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use validator::Validate;

    use super::ImportRequest;
    use crate::{
        api::tests::{json_request, send},
        util::providers::ProviderKind,
    };

    fn import(
        provider: ProviderKind,
        external_id: Option<&str>,
        artist: Option<&str>,
        title: Option<&str>,
    ) -> ImportRequest {
        ImportRequest {
            provider,
            external_id: external_id.map(str::to_owned),
            artist: artist.map(str::to_owned),
            title: title.map(str::to_owned),
        }
    }

    #[test]
    fn import_needs_provider_specific_fields() {
        assert!(import(ProviderKind::Jamendo, Some("1532771"), None, None).validate().is_ok());
        assert!(import(ProviderKind::Jamendo, Some("  "), None, None).validate().is_err());
        assert!(import(ProviderKind::LastFm, None, Some("Bonobo"), Some("Kerala")).validate().is_ok());
        assert!(import(ProviderKind::LastFm, None, Some("Bonobo"), None).validate().is_err());
        assert!(import(ProviderKind::Local, Some("1"), None, None).validate().is_err());
    }

    #[tokio::test]
    async fn import_needs_a_token() {
        let response = send(json_request(
            Method::POST,
            "/api/tracks/import",
            &json!({"provider": "jamendo", "externalId": "1"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
