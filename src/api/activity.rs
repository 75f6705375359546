use axum::{
    extract::{Path, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::instrument;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    models::{
        activities::{Activity, ActivityWithUser},
        follows::UserFollow,
        users::User,
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        query::{PageParams, Paginated},
        validator::ValidatedQuery,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_feed))
        .routes(routes!(get_user_activity))
}

/// Newest activities of the given users, with the acting user attached.
async fn activities_of(
    user_ids: &[i32],
    page: &PageParams,
    conn: &mut AsyncPgConnection,
) -> QueryResult<Paginated<ActivityWithUser>> {
    use crate::schema::{activities, users};

    if user_ids.is_empty() {
        return Ok(Paginated {
            results: Vec::new(),
            total: 0,
        });
    }

    let total: i64 = activities::table
        .filter(activities::user_id.eq_any(user_ids))
        .count()
        .get_result(conn)
        .await?;
    let rows: Vec<(Activity, User)> = activities::table
        .inner_join(users::table)
        .filter(activities::user_id.eq_any(user_ids))
        .order((activities::created_at.desc(), activities::id.desc()))
        .select((Activity::as_select(), User::as_select()))
        .offset(page.offset())
        .limit(page.limit())
        .load(conn)
        .await?;

    Ok(Paginated {
        results: rows
            .into_iter()
            .map(|(activity, user)| ActivityWithUser {
                activity,
                user: user.into(),
            })
            .collect(),
        total,
    })
}

/// Get what the people you follow have been up to
#[utoipa::path(
    method(get),
    path = "/feed",
    params(PageParams),
    responses(
        (status = OK, description = "Success", body = Paginated<ActivityWithUser>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn get_feed(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<ActivityWithUser>>, RouteError> {
    let mut conn = state.db.get().await?;
    let followed = UserFollow::followee_ids(claims.profile.id, &mut conn).await?;

    Ok(Json(activities_of(&followed, &page, &mut conn).await?))
}

/// Get a user's own activities
#[utoipa::path(
    method(get),
    path = "/users/{id}",
    params(
        ("id" = i32, Path, description = "ID of user"),
        PageParams
    ),
    responses(
        (status = OK, description = "Success", body = Paginated<ActivityWithUser>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "User not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_user_activity(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<ActivityWithUser>>, RouteError> {
    use crate::schema::users;

    let mut conn = state.db.get().await?;
    users::table
        .find(id)
        .select(users::id)
        .first::<i32>(&mut conn)
        .await
        .optional()?
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("User not found"))?;

    Ok(Json(activities_of(&[id], &page, &mut conn).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::api::tests::{empty_request, send};

    #[tokio::test]
    async fn feed_needs_a_token() {
        let response = send(empty_request(Method::GET, "/api/activity/feed")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn page_size_is_bounded() {
        let response = send(empty_request(
            Method::GET,
            "/api/activity/users/1?pageSize=500",
        ))
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
