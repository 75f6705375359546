use axum::{
    extract::{Path, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    models::{
        activities::NewActivity,
        artists::Artist,
        follows::UserFollow,
        tracks::{Track, TrackWithArtist},
        users::{PrivateUser, PublicUser, User, UserProfileChanges},
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        query::{PageParams, Paginated},
        validator::{ValidatedJson, ValidatedQuery},
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_self, update_self))
        .routes(routes!(get_user))
        .routes(routes!(toggle_follow))
        .routes(routes!(get_followers))
        .routes(routes!(get_following))
        .routes(routes!(get_likes))
}

async fn find_user(id: i32, conn: &mut diesel_async::AsyncPgConnection) -> Result<User, RouteError> {
    use crate::schema::users;

    users::table
        .find(id)
        .first::<User>(conn)
        .await
        .optional()?
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("User not found"))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct UserProfileResponse {
    #[serde(flatten)]
    user: PublicUser,
    followers: i64,
    following: i64,
    likes: i64,
    public_playlists: i64,
}

/// Get a user's public profile
#[utoipa::path(
    method(get),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of user to get"),
    ),
    responses(
        (status = OK, description = "Success", body = UserProfileResponse, content_type = "application/json"),
        (status = NOT_FOUND, description = "User not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<UserProfileResponse>, RouteError> {
    let mut conn = state.db.get().await?;
    let user = find_user(id, &mut conn).await?;
    Ok(Json(profile_of(user, &mut conn).await?))
}

/// Get own profile, with the same counts others see
#[utoipa::path(
    method(get),
    path = "/self",
    responses(
        (status = OK, description = "Success", body = UserProfileResponse, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip_all, fields(user_id = claims.profile.id), err(Debug))]
async fn get_self(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UserProfileResponse>, RouteError> {
    let mut conn = state.db.get().await?;
    let user = find_user(claims.profile.id, &mut conn).await?;
    Ok(Json(profile_of(user, &mut conn).await?))
}

async fn profile_of(
    user: User,
    conn: &mut diesel_async::AsyncPgConnection,
) -> Result<UserProfileResponse, RouteError> {
    use crate::schema::{track_likes, user_playlists};

    let followers = UserFollow::follower_count(user.id, conn).await?;
    let following = UserFollow::following_count(user.id, conn).await?;
    let likes: i64 = track_likes::table
        .filter(track_likes::user_id.eq(user.id))
        .count()
        .get_result(conn)
        .await?;
    let public_playlists: i64 = user_playlists::table
        .filter(user_playlists::owner_id.eq(user.id))
        .filter(user_playlists::is_public.eq(true))
        .count()
        .get_result(conn)
        .await?;

    Ok(UserProfileResponse {
        user: user.into(),
        followers,
        following,
        likes,
        public_playlists,
    })
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 64))]
    display_name: Option<String>,
    #[validate(length(max = 1000))]
    bio: Option<String>,
    #[validate(url)]
    avatar_url: Option<String>,
}

/// Update own profile
#[utoipa::path(
    method(patch),
    path = "/self",
    request_body = UpdateProfileRequest,
    responses(
        (status = OK, description = "Success", body = PrivateUser, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip_all, fields(user_id = claims.profile.id), err(Debug))]
async fn update_self(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<UpdateProfileRequest>,
) -> Result<Json<PrivateUser>, RouteError> {
    use crate::schema::users;

    let changes = UserProfileChanges {
        display_name: payload.display_name,
        bio: payload.bio,
        avatar_url: payload.avatar_url,
    };

    let mut conn = state.db.get().await?;
    if changes.is_empty() {
        return Ok(Json(find_user(claims.profile.id, &mut conn).await?.into()));
    }

    let user: User = diesel::update(users::table.find(claims.profile.id))
        .set(&changes)
        .get_result(&mut conn)
        .await?;

    Ok(Json(user.into()))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct FollowResponse {
    following: bool,
}

/// Follow or unfollow a user
#[utoipa::path(
    method(post),
    path = "/{id}/follow",
    params(
        ("id" = i32, Path, description = "ID of user to (un)follow"),
    ),
    responses(
        (status = OK, description = "Success", body = FollowResponse, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Tried to follow yourself", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "User not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn toggle_follow(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<Json<FollowResponse>, RouteError> {
    if id == claims.profile.id {
        return Err(RouteError::new_bad_request().set_public_error_message("You can't follow yourself"));
    }

    let mut conn = state.db.get().await?;
    find_user(id, &mut conn).await?;

    let following = UserFollow::toggle(claims.profile.id, id, &mut conn).await?;
    if following {
        NewActivity::followed(claims.profile.id, id)
            .record_or_warn(&mut conn, &state.live)
            .await;
    }

    Ok(Json(FollowResponse { following }))
}

/// Get a user's followers
#[utoipa::path(
    method(get),
    path = "/{id}/followers",
    params(
        ("id" = i32, Path, description = "ID of user"),
        PageParams
    ),
    responses(
        (status = OK, description = "Success", body = Paginated<PublicUser>, content_type = "application/json"),
        (status = NOT_FOUND, description = "User not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_followers(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<PublicUser>>, RouteError> {
    use crate::schema::{user_follows, users};

    let mut conn = state.db.get().await?;
    find_user(id, &mut conn).await?;

    let total = UserFollow::follower_count(id, &mut conn).await?;
    let results: Vec<User> = user_follows::table
        .inner_join(users::table.on(users::id.eq(user_follows::follower_id)))
        .filter(user_follows::followee_id.eq(id))
        .order(user_follows::created_at.desc())
        .select(User::as_select())
        .offset(page.offset())
        .limit(page.limit())
        .load(&mut conn)
        .await?;

    Ok(Json(Paginated {
        results: results.into_iter().map(PublicUser::from).collect(),
        total,
    }))
}

/// Get the users someone follows
#[utoipa::path(
    method(get),
    path = "/{id}/following",
    params(
        ("id" = i32, Path, description = "ID of user"),
        PageParams
    ),
    responses(
        (status = OK, description = "Success", body = Paginated<PublicUser>, content_type = "application/json"),
        (status = NOT_FOUND, description = "User not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_following(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<PublicUser>>, RouteError> {
    use crate::schema::{user_follows, users};

    let mut conn = state.db.get().await?;
    find_user(id, &mut conn).await?;

    let total = UserFollow::following_count(id, &mut conn).await?;
    let results: Vec<User> = user_follows::table
        .inner_join(users::table.on(users::id.eq(user_follows::followee_id)))
        .filter(user_follows::follower_id.eq(id))
        .order(user_follows::created_at.desc())
        .select(User::as_select())
        .offset(page.offset())
        .limit(page.limit())
        .load(&mut conn)
        .await?;

    Ok(Json(Paginated {
        results: results.into_iter().map(PublicUser::from).collect(),
        total,
    }))
}

/// Get the tracks a user liked, newest like first
#[utoipa::path(
    method(get),
    path = "/{id}/likes",
    params(
        ("id" = i32, Path, description = "ID of user"),
        PageParams
    ),
    responses(
        (status = OK, description = "Success", body = Paginated<TrackWithArtist>, content_type = "application/json"),
        (status = NOT_FOUND, description = "User not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_likes(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<TrackWithArtist>>, RouteError> {
    use crate::schema::{artists, track_likes, tracks};

    let mut conn = state.db.get().await?;
    find_user(id, &mut conn).await?;

    let total: i64 = track_likes::table
        .filter(track_likes::user_id.eq(id))
        .count()
        .get_result(&mut conn)
        .await?;
    let results: Vec<(Track, Artist)> = track_likes::table
        .inner_join(tracks::table.inner_join(artists::table))
        .filter(track_likes::user_id.eq(id))
        .order(track_likes::created_at.desc())
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

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::tests::{empty_request, json_request, send};

    #[tokio::test]
    async fn own_profile_is_routed_and_needs_a_token() {
        let response = send(empty_request(Method::GET, "/api/users/self")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_update_needs_a_token() {
        let response = send(json_request(
            Method::PATCH,
            "/api/users/self",
            &json!({"bio": "hello"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
