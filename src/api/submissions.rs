use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use super::tracks::find_track;
use crate::{
    models::{
        activities::NewActivity,
        artists::Artist,
        submissions::{NewSubmission, SubmissionWithTrack, WeeklySubmission},
        tracks::{Track, TrackWithArtist},
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jam_types::{ActivityKind, ChartCategory, SubmissionStatus},
        jwt::Claims,
        query::{PageParams, Paginated},
        validator::{ValidatedJson, ValidatedQuery},
        week::WeekKey,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_submissions, submit_track))
        .routes(routes!(get_own_submissions))
        .routes(routes!(review_submission))
        .routes(routes!(withdraw_submission))
}

async fn find_submission(
    id: i32,
    conn: &mut AsyncPgConnection,
) -> Result<WeeklySubmission, RouteError> {
    use crate::schema::weekly_submissions;

    weekly_submissions::table
        .find(id)
        .first::<WeeklySubmission>(conn)
        .await
        .optional()?
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("Submission not found"))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    track_id: i32,
    category: ChartCategory,
    #[validate(length(max = 500))]
    note: Option<String>,
}

/// Submit a track for this week's charts
#[utoipa::path(
    method(post),
    path = "/",
    request_body = SubmitRequest,
    responses(
        (status = OK, description = "Success", body = WeeklySubmission, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Track not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Already submitted this week", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn submit_track(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<SubmitRequest>,
) -> Result<Json<WeeklySubmission>, RouteError> {
    let mut conn = state.db.get().await?;
    find_track(payload.track_id, &mut conn).await?;

    let week = WeekKey::current();
    let submission = NewSubmission::new(
        claims.profile.id,
        payload.track_id,
        week,
        payload.category.as_str(),
        payload.note.as_deref(),
    )
    .insert(&mut conn)
    .await
    .map_err(|e| {
        let err = RouteError::from(e);
        if err.status() == axum::http::StatusCode::CONFLICT {
            RouteError::new_conflict().set_public_error_message(&format!(
                "You already submitted a track to {} for {week}",
                payload.category
            ))
        } else {
            err
        }
    })?;

    NewActivity::track(claims.profile.id, ActivityKind::SubmittedTrack, payload.track_id)
        .record_or_warn(&mut conn, &state.live)
        .await;

    Ok(Json(submission))
}

/// Get own submissions, newest first
#[utoipa::path(
    method(get),
    path = "/self",
    responses(
        (status = OK, description = "Success", body = Vec<WeeklySubmission>, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip_all, fields(user_id = claims.profile.id), err(Debug))]
async fn get_own_submissions(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<WeeklySubmission>>, RouteError> {
    use crate::schema::weekly_submissions;

    let mut conn = state.db.get().await?;
    let submissions = weekly_submissions::table
        .filter(weekly_submissions::user_id.eq(claims.profile.id))
        .order(weekly_submissions::submitted_at.desc())
        .load(&mut conn)
        .await?;

    Ok(Json(submissions))
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
struct SubmissionFilter {
    /// ISO week like `2024-W07`. Defaults to the current week.
    #[param(value_type = Option<String>)]
    week: Option<WeekKey>,
    category: Option<ChartCategory>,
    /// Defaults to approved
    status: Option<SubmissionStatus>,
}

/// List submissions for a week
#[utoipa::path(
    method(get),
    path = "/",
    params(SubmissionFilter, PageParams),
    responses(
        (status = OK, description = "Success", body = Paginated<SubmissionWithTrack>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_submissions(
    State(state): State<AppState>,
    Query(filter): Query<SubmissionFilter>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<SubmissionWithTrack>>, RouteError> {
    use crate::schema::{artists, tracks, weekly_submissions};

    let week = filter.week.unwrap_or_else(WeekKey::current).to_string();
    let status = filter.status.unwrap_or(SubmissionStatus::Approved);
    let filtered = || {
        let mut query = weekly_submissions::table
            .inner_join(tracks::table.inner_join(artists::table))
            .filter(weekly_submissions::week_key.eq(week.clone()))
            .filter(weekly_submissions::status.eq(status))
            .into_boxed();
        if let Some(category) = filter.category {
            query = query.filter(weekly_submissions::category.eq(category.as_str()));
        }
        query
    };

    let mut conn = state.db.get().await?;
    let total: i64 = filtered().count().get_result(&mut conn).await?;
    let rows: Vec<(WeeklySubmission, Track, Artist)> = filtered()
        .order((
            weekly_submissions::submitted_at.asc(),
            weekly_submissions::id.asc(),
        ))
        .select((
            WeeklySubmission::as_select(),
            Track::as_select(),
            Artist::as_select(),
        ))
        .offset(page.offset())
        .limit(page.limit())
        .load(&mut conn)
        .await?;

    Ok(Json(Paginated {
        results: rows
            .into_iter()
            .map(|(submission, track, artist)| SubmissionWithTrack {
                submission,
                track: TrackWithArtist { track, artist },
            })
            .collect(),
        total,
    }))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    approve: bool,
    #[validate(length(max = 500))]
    note: Option<String>,
}

/// Approve or reject a pending submission
#[utoipa::path(
    method(post),
    path = "/{id}/review",
    params(
        ("id" = i32, Path, description = "ID of submission to review"),
    ),
    request_body = ReviewRequest,
    responses(
        (status = OK, description = "Success", body = WeeklySubmission, content_type = "application/json"),
        (status = NOT_FOUND, description = "Submission not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Submission was already reviewed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn review_submission(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
    ValidatedJson(payload): ValidatedJson<ReviewRequest>,
) -> Result<Json<WeeklySubmission>, RouteError> {
    let mut conn = state.db.get().await?;
    if !claims.is_staff(&mut conn).await? {
        return Err(RouteError::new_forbidden()
            .set_public_error_message("Only moderators can review submissions"));
    }

    let submission = find_submission(id, &mut conn).await?;
    let already_reviewed = || {
        RouteError::new_conflict().set_public_error_message("Submission was already reviewed")
    };
    if !submission.is_pending() {
        return Err(already_reviewed());
    }

    // Someone else may have reviewed it between the lookup and the update
    let reviewed = submission
        .review(
            payload.approve,
            claims.profile.id,
            payload.note.as_deref(),
            &mut conn,
        )
        .await
        .optional()?
        .ok_or_else(already_reviewed)?;

    info!(
        submission_id = reviewed.id,
        status = ?reviewed.status,
        "Reviewed submission"
    );
    Ok(Json(reviewed))
}

/// Withdraw own submission while it's still pending
#[utoipa::path(
    method(delete),
    path = "/{id}",
    params(
        ("id" = i32, Path, description = "ID of submission to withdraw"),
    ),
    responses(
        (status = OK, description = "Success"),
        (status = NOT_FOUND, description = "Submission not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Submission was already reviewed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not your submission", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn withdraw_submission(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<i32>,
) -> Result<(), RouteError> {
    use crate::schema::weekly_submissions;

    let mut conn = state.db.get().await?;
    let submission = find_submission(id, &mut conn).await?;
    if submission.user_id != claims.profile.id {
        return Err(RouteError::new_forbidden()
            .set_public_error_message("You can only withdraw your own submissions"));
    }

    let deleted = diesel::delete(
        weekly_submissions::table
            .filter(weekly_submissions::id.eq(submission.id))
            .filter(weekly_submissions::status.eq(SubmissionStatus::Pending)),
    )
    .execute(&mut conn)
    .await?;
    if deleted == 0 {
        return Err(RouteError::new_conflict()
            .set_public_error_message("Reviewed submissions can't be withdrawn"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::tests::{body_json, json_request, send};

    #[tokio::test]
    async fn submitting_needs_a_token() {
        let response = send(json_request(
            Method::POST,
            "/api/submissions",
            &json!({"trackId": 1, "category": "fresh"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn review_needs_a_token() {
        let response = send(json_request(
            Method::POST,
            "/api/submissions/3/review",
            &json!({"approve": true}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "No token found");
    }
}
