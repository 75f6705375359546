use axum::{
    extract::{Path, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use super::tracks::find_track;
use crate::{
    models::{
        activities::NewActivity,
        playlists::{NewPlaylist, PlaylistChanges, PlaylistEntry, UserPlaylist, UserPlaylistTrack},
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        validator::{not_blank, ValidatedJson},
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_own_playlists))
        .routes(routes!(create_playlist))
        .routes(routes!(get_playlist, update_playlist, delete_playlist))
        .routes(routes!(add_track, reorder_tracks))
        .routes(routes!(remove_track))
}

/// Looks up a playlist the way `viewer` is allowed to see it.
/// Private playlists of other users look like they don't exist.
async fn find_visible(
    id: i32,
    viewer: Option<i32>,
    conn: &mut AsyncPgConnection,
) -> Result<UserPlaylist, RouteError> {
    use crate::schema::user_playlists;

    user_playlists::table
        .find(id)
        .first::<UserPlaylist>(conn)
        .await
        .optional()?
        .filter(|playlist| playlist.visible_to(viewer))
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("Playlist not found"))
}

/// Like [`find_visible`], but the caller must own the playlist.
async fn find_owned(
    id: i32,
    claims: &Claims,
    conn: &mut AsyncPgConnection,
) -> Result<UserPlaylist, RouteError> {
    let playlist = find_visible(id, Some(claims.profile.id), conn).await?;
    if playlist.owner_id != claims.profile.id {
        return Err(RouteError::new_forbidden()
            .set_public_error_message("Only the owner can change this playlist"));
    }
    Ok(playlist)
}

/// Get own playlists
#[utoipa::path(
    method(get),
    path = "/self",
    responses(
        (status = OK, description = "Success", body = Vec<UserPlaylist>, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip_all, fields(user_id = claims.profile.id), err(Debug))]
async fn get_own_playlists(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UserPlaylist>>, RouteError> {
    use crate::schema::user_playlists;

    let mut conn = state.db.get().await?;
    let playlists = user_playlists::table
        .filter(user_playlists::owner_id.eq(claims.profile.id))
        .order(user_playlists::updated_at.desc())
        .load(&mut conn)
        .await?;

    Ok(Json(playlists))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CreatePlaylistRequest {
    #[validate(length(min = 1, max = 100), custom(function = "not_blank"))]
    name: String,
    #[validate(length(max = 1000))]
    description: Option<String>,
    #[serde(default)]
    is_public: bool,
}

/// Create a playlist
#[utoipa::path(
    method(post),
    path = "/",
    request_body = CreatePlaylistRequest,
    responses(
        (status = OK, description = "Success", body = UserPlaylist, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip_all, fields(user_id = claims.profile.id), err(Debug))]
async fn create_playlist(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<CreatePlaylistRequest>,
) -> Result<Json<UserPlaylist>, RouteError> {
    let mut conn = state.db.get().await?;
    let playlist = NewPlaylist {
        owner_id: claims.profile.id,
        name: payload.name.trim(),
        description: payload.description.as_deref(),
        is_public: payload.is_public,
    }
    .insert(&mut conn)
    .await?;

    NewActivity::playlist(claims.profile.id, playlist.id)
        .record_or_warn(&mut conn, &state.live)
        .await;

    Ok(Json(playlist))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PlaylistResponse {
    #[serde(flatten)]
    playlist: UserPlaylist,
    tracks: Vec<PlaylistEntry>,
}

/// Get a playlist with its tracks in order
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of playlist to get"),
    ),
    responses(
        (status = OK, description = "Success", body = PlaylistResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "Playlist not found or private", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        (),
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), err(Debug))]
async fn get_playlist(
    State(state): State<AppState>,
    claims: Option<Claims>,
    Path(id): Path<i32>,
) -> Result<Json<PlaylistResponse>, RouteError> {
    let mut conn = state.db.get().await?;
    let playlist = find_visible(id, claims.map(|c| c.profile.id), &mut conn).await?;
    let tracks = playlist.entries(&mut conn).await?;

    Ok(Json(PlaylistResponse { playlist, tracks }))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct UpdatePlaylistRequest {
    #[validate(length(min = 1, max = 100), custom(function = "not_blank"))]
    name: Option<String>,
    #[validate(length(max = 1000))]
    description: Option<String>,
    is_public: Option<bool>,
}

/// Update a playlist's details
#[utoipa::path(
    method(patch),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of playlist to update"),
    ),
    request_body = UpdatePlaylistRequest,
    responses(
        (status = OK, description = "Success", body = UserPlaylist, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Playlist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not the owner", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn update_playlist(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    ValidatedJson(payload): ValidatedJson<UpdatePlaylistRequest>,
) -> Result<Json<UserPlaylist>, RouteError> {
    use crate::schema::user_playlists;

    let mut conn = state.db.get().await?;
    let playlist = find_owned(id, &claims, &mut conn).await?;

    let changes = PlaylistChanges {
        name: payload.name.map(|name| name.trim().to_owned()),
        description: payload.description,
        is_public: payload.is_public,
        updated_at: Some(OffsetDateTime::now_utc()),
    };
    let updated = diesel::update(user_playlists::table.find(playlist.id))
        .set(&changes)
        .get_result(&mut conn)
        .await?;

    Ok(Json(updated))
}

/// Delete a playlist
#[utoipa::path(
    method(delete),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of playlist to delete"),
    ),
    responses(
        (status = OK, description = "Success"),
        (status = NOT_FOUND, description = "Playlist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not the owner", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn delete_playlist(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<(), RouteError> {
    use crate::schema::user_playlists;

    let mut conn = state.db.get().await?;
    let playlist = find_owned(id, &claims, &mut conn).await?;
    diesel::delete(user_playlists::table.find(playlist.id))
        .execute(&mut conn)
        .await?;

    Ok(())
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct AddTrackRequest {
    track_id: i32,
}

/// Append a track to a playlist
#[utoipa::path(
    method(post),
    path = "/{id}/tracks",
    params(
        ("id" = i32, Path, description = "ID of playlist"),
    ),
    request_body = AddTrackRequest,
    responses(
        (status = OK, description = "Success", body = UserPlaylistTrack, content_type = "application/json"),
        (status = NOT_FOUND, description = "Playlist or track not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not the owner", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Track already in playlist", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn add_track(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    ValidatedJson(payload): ValidatedJson<AddTrackRequest>,
) -> Result<Json<UserPlaylistTrack>, RouteError> {
    let mut conn = state.db.get().await?;
    let playlist = find_owned(id, &claims, &mut conn).await?;
    find_track(payload.track_id, &mut conn).await?;

    let entry = playlist
        .append_track(payload.track_id, &mut conn)
        .await
        .map_err(|e| {
            let err = RouteError::from(e);
            if err.status() == axum::http::StatusCode::CONFLICT {
                RouteError::new_conflict().set_public_error_message("Track is already in the playlist")
            } else {
                err
            }
        })?;

    Ok(Json(entry))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ReorderRequest {
    #[validate(length(max = 10000))]
    track_ids: Vec<i32>,
}

/// Reorder a playlist. The new order must contain every track exactly once.
#[utoipa::path(
    method(put),
    path = "/{id}/tracks",
    params(
        ("id" = i32, Path, description = "ID of playlist"),
    ),
    request_body = ReorderRequest,
    responses(
        (status = OK, description = "Success", body = Vec<PlaylistEntry>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Not a permutation of the playlist's tracks", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Playlist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not the owner", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn reorder_tracks(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    ValidatedJson(payload): ValidatedJson<ReorderRequest>,
) -> Result<Json<Vec<PlaylistEntry>>, RouteError> {
    let mut conn = state.db.get().await?;
    let playlist = find_owned(id, &claims, &mut conn).await?;

    if !playlist.reorder(&payload.track_ids, &mut conn).await? {
        return Err(RouteError::new_bad_request().set_public_error_message(
            "trackIds must list every track of the playlist exactly once",
        ));
    }

    Ok(Json(playlist.entries(&mut conn).await?))
}

/// Remove a track from a playlist
#[utoipa::path(
    method(delete),
    path = "/{id}/tracks/{track_id}",
    params(
        ("id" = i32, Path, description = "ID of playlist"),
        ("track_id" = i32, Path, description = "ID of track to remove"),
    ),
    responses(
        (status = OK, description = "Success"),
        (status = NOT_FOUND, description = "Playlist not found or track not in it", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not the owner", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn remove_track(
    State(state): State<AppState>,
    claims: Claims,
    Path((id, track_id)): Path<(i32, i32)>,
) -> Result<(), RouteError> {
    let mut conn = state.db.get().await?;
    let playlist = find_owned(id, &claims, &mut conn).await?;

    playlist
        .remove_track(track_id, &mut conn)
        .await
        .optional()?
        .ok_or_else(|| {
            RouteError::new_not_found().set_public_error_message("Track is not in the playlist")
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use validator::Validate;

    use super::{CreatePlaylistRequest, UpdatePlaylistRequest};
    use crate::api::tests::{json_request, send};

    #[test]
    fn playlist_names_are_bounded() {
        let request = |name: &str| CreatePlaylistRequest {
            name: name.to_owned(),
            description: None,
            is_public: true,
        };
        assert!(request("Road trip").validate().is_ok());
        assert!(request("").validate().is_err());
        assert!(request("   ").validate().is_err());
        assert!(request(&"n".repeat(101)).validate().is_err());
    }

    #[test]
    fn renaming_to_blank_is_rejected() {
        let request = |name: Option<&str>| UpdatePlaylistRequest {
            name: name.map(str::to_owned),
            description: None,
            is_public: None,
        };
        assert!(request(None).validate().is_ok());
        assert!(request(Some("Late night")).validate().is_ok());
        assert!(request(Some(" \t ")).validate().is_err());
    }

    #[tokio::test]
    async fn reorder_needs_a_token() {
        let response = send(json_request(
            Method::PUT,
            "/api/playlists/1/tracks",
            &json!({"trackIds": [2, 1]}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
