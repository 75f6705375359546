use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    models::{
        activities::NewActivity,
        artists::NewArtist,
        tracks::{NewTrack, TrackWithArtist},
        users::User,
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jam_types::{ActivityKind, TrackSource},
        jobs::TranscodeJob,
        jwt::Claims,
        s3::{is_audio_content_type, key_belongs_to, object_key, Presigner},
        validator::{not_blank, ValidatedJson},
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(presign_upload))
        .routes(routes!(complete_upload))
}

fn presigner(state: &AppState) -> Result<&Presigner, RouteError> {
    state.presigner.as_deref().ok_or_else(|| {
        RouteError::new(StatusCode::SERVICE_UNAVAILABLE)
            .set_public_error_message("Uploads are not available")
    })
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PresignRequest {
    #[validate(length(min = 1, max = 255))]
    filename: String,
    #[validate(length(min = 1, max = 100))]
    content_type: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct PresignResponse {
    /// `PUT` the file here, with the same `Content-Type`
    upload_url: String,
    /// Pass this to `/complete` once the upload finished
    key: String,
    /// Seconds the URL stays valid
    expires_in: u32,
}

/// Get a signed URL to upload an audio file to
#[utoipa::path(
    method(post),
    path = "/presign",
    request_body = PresignRequest,
    responses(
        (status = OK, description = "Success", body = PresignResponse, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters or not an audio file", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = SERVICE_UNAVAILABLE, description = "Storage not configured", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn presign_upload(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<PresignRequest>,
) -> Result<Json<PresignResponse>, RouteError> {
    if !is_audio_content_type(&payload.content_type) {
        return Err(RouteError::new_bad_request()
            .set_public_error_message("Only audio files can be uploaded"));
    }

    let presigner = presigner(&state)?;
    let key = object_key(claims.profile.id, &payload.filename);
    let signed = presigner.presign_put(&key, &payload.content_type)?;

    Ok(Json(PresignResponse {
        upload_url: signed.url,
        key,
        expires_in: signed.expires_in,
    }))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest {
    #[validate(length(min = 1, max = 512))]
    key: String,
    #[validate(length(min = 1, max = 200), custom(function = "not_blank"))]
    title: String,
    /// Defaults to your display name
    #[validate(length(min = 1, max = 200))]
    artist_name: Option<String>,
    #[validate(length(max = 200))]
    album: Option<String>,
}

/// Turn a finished upload into a track and queue it for transcoding
#[utoipa::path(
    method(post),
    path = "/complete",
    request_body = CompleteRequest,
    responses(
        (status = OK, description = "Success", body = TrackWithArtist, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Key is not one of your uploads", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Upload was already completed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn complete_upload(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<CompleteRequest>,
) -> Result<Json<TrackWithArtist>, RouteError> {
    use crate::schema::users;

    if !key_belongs_to(&payload.key, claims.profile.id) {
        return Err(RouteError::new_forbidden()
            .set_public_error_message("That key is not one of your uploads"));
    }

    let mut conn = state.db.get().await?;
    let artist = match payload.artist_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => NewArtist::new(name).find_or_create(&mut conn).await?,
        _ => {
            let user: User = users::table
                .find(claims.profile.id)
                .first(&mut conn)
                .await?;
            NewArtist::new(user.shown_name())
                .claimed_by(user.id)
                .find_or_create(&mut conn)
                .await?
        }
    };

    let track = NewTrack {
        title: payload.title.trim(),
        artist_id: artist.id,
        album: payload.album.as_deref(),
        duration_secs: None,
        audio_url: None,
        cover_url: None,
        source: TrackSource::Local,
        external_id: Some(&payload.key),
        uploaded_by: Some(claims.profile.id),
    }
    .insert(&mut conn)
    .await
    .map_err(|e| {
        let err = RouteError::from(e);
        if err.status() == StatusCode::CONFLICT {
            RouteError::new_conflict().set_public_error_message("Upload was already completed")
        } else {
            err
        }
    })?;

    // The track exists either way, a requeue from the manager can pick it up later
    if let Err(e) = TranscodeJob::new(track.id, &payload.key, claims.profile.id)
        .enqueue(&state.redis)
        .await
    {
        warn!(track_id = track.id, "Failed to queue transcode job: {e}");
    }

    NewActivity::track(claims.profile.id, ActivityKind::UploadedTrack, track.id)
        .record_or_warn(&mut conn, &state.live)
        .await;

    Ok(Json(TrackWithArtist { track, artist }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use validator::Validate;

    use super::CompleteRequest;
    use crate::api::tests::{json_request, send};

    #[test]
    fn blank_titles_are_rejected() {
        let request = |title: &str| CompleteRequest {
            key: "uploads/1/abc-demo.mp3".to_owned(),
            title: title.to_owned(),
            artist_name: None,
            album: None,
        };
        assert!(request("Demo").validate().is_ok());
        assert!(request("  ").validate().is_err());
    }

    #[tokio::test]
    async fn presigning_needs_a_token() {
        let response = send(json_request(
            Method::POST,
            "/api/uploads/presign",
            &json!({"filename": "demo.mp3", "contentType": "audio/mpeg"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn completing_needs_a_token() {
        let response = send(json_request(
            Method::POST,
            "/api/uploads/complete",
            &json!({"key": "uploads/1/abc-demo.mp3", "title": "Demo"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
