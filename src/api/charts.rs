use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tracing::{instrument, warn};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    models::{
        artists::Artist,
        rankings::{RankingSnapshot, RankingSnapshotMeta},
        tracks::{Track, TrackWithArtist},
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jam_types::ChartCategory,
        jwt::Claims,
        live::{LiveEvent, CHARTS_CHANNEL},
        trending,
        validator::ValidatedQuery,
        week::WeekKey,
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_trending))
        .routes(routes!(get_chart))
        .routes(routes!(get_chart_history))
        .routes(routes!(refresh_chart))
}

/// Recompute a chart for the current week
#[utoipa::path(
    method(post),
    path = "/{category}/refresh",
    params(
        ("category" = ChartCategory, Path, description = "Chart to refresh"),
    ),
    responses(
        (status = OK, description = "Success", body = RankingSnapshot, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Unknown category", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = FORBIDDEN, description = "Not a moderator", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn refresh_chart(
    State(state): State<AppState>,
    claims: Claims,
    Path(category): Path<ChartCategory>,
) -> Result<Json<RankingSnapshot>, RouteError> {
    let mut conn = state.db.get().await?;
    if !claims.is_staff(&mut conn).await? {
        return Err(
            RouteError::new_forbidden().set_public_error_message("Only moderators can refresh charts")
        );
    }

    let snapshot = RankingSnapshot::refresh(
        category,
        WeekKey::current(),
        state.config.charts.size,
        &mut conn,
    )
    .await?;

    match LiveEvent::new("chartRefreshed", &snapshot) {
        Ok(event) => {
            state.live.publish(CHARTS_CHANNEL, event);
        }
        Err(e) => warn!("Failed to serialize snapshot {}: {e}", snapshot.id),
    }

    Ok(Json(snapshot))
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
struct ChartParams {
    /// ISO week like `2024-W07`. Without it, the newest snapshot of any week is returned.
    #[param(value_type = Option<String>)]
    week: Option<WeekKey>,
}

/// Get the latest snapshot of a chart
#[utoipa::path(
    method(get),
    path = "/{category}",
    params(
        ("category" = ChartCategory, Path, description = "Chart to get"),
        ChartParams
    ),
    responses(
        (status = OK, description = "Success", body = RankingSnapshot, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Chart was never computed", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_chart(
    State(state): State<AppState>,
    Path(category): Path<ChartCategory>,
    Query(params): Query<ChartParams>,
) -> Result<Json<RankingSnapshot>, RouteError> {
    let mut conn = state.db.get().await?;
    let snapshot = RankingSnapshot::latest(category, params.week, &mut conn)
        .await?
        .ok_or_else(|| RouteError::new_not_found().set_public_error_message("No chart computed yet"))?;

    Ok(Json(snapshot))
}

/// List the snapshots of a chart, newest first
#[utoipa::path(
    method(get),
    path = "/{category}/history",
    params(
        ("category" = ChartCategory, Path, description = "Chart to list"),
    ),
    responses(
        (status = OK, description = "Success", body = Vec<RankingSnapshotMeta>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Unknown category", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_chart_history(
    State(state): State<AppState>,
    Path(category): Path<ChartCategory>,
) -> Result<Json<Vec<RankingSnapshotMeta>>, RouteError> {
    use crate::schema::ranking_snapshots;

    let mut conn = state.db.get().await?;
    let snapshots = ranking_snapshots::table
        .filter(ranking_snapshots::category.eq(category.as_str()))
        .order((
            ranking_snapshots::computed_at.desc(),
            ranking_snapshots::id.desc(),
        ))
        .select(RankingSnapshotMeta::as_select())
        .load(&mut conn)
        .await?;

    Ok(Json(snapshots))
}

#[serde_inline_default]
#[derive(Deserialize, Validate, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
struct TrendingParams {
    #[validate(range(min = 1, max = 100))]
    #[serde_inline_default(20)]
    limit: i64,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct TrendingEntry {
    rank: u32,
    /// Streams counted so far this week
    streams: i64,
    track: TrackWithArtist,
}

/// Most streamed tracks of the current week, updated live
#[utoipa::path(
    method(get),
    path = "/trending",
    params(TrendingParams),
    responses(
        (status = OK, description = "Success", body = Vec<TrendingEntry>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_trending(
    State(state): State<AppState>,
    ValidatedQuery(params): ValidatedQuery<TrendingParams>,
) -> Result<Json<Vec<TrendingEntry>>, RouteError> {
    use crate::schema::{artists, tracks};

    let ranked = trending::top(&state.redis, WeekKey::current(), params.limit).await?;
    if ranked.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let ids: Vec<i32> = ranked.iter().map(|(id, _)| *id).collect();
    let mut conn = state.db.get().await?;
    let mut found: HashMap<i32, TrackWithArtist> = tracks::table
        .inner_join(artists::table)
        .filter(tracks::id.eq_any(&ids))
        .select((Track::as_select(), Artist::as_select()))
        .load::<(Track, Artist)>(&mut conn)
        .await?
        .into_iter()
        .map(|row| (row.0.id, TrackWithArtist::from(row)))
        .collect();

    // Deleted tracks can linger in the counters until the week rolls over
    Ok(Json(
        (1u32..)
            .zip(ranked.into_iter().filter_map(|(id, streams)| {
                found.remove(&id).map(|track| (streams, track))
            }))
            .map(|(rank, (streams, track))| TrendingEntry {
                rank,
                streams,
                track,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::api::tests::{empty_request, send};

    #[tokio::test]
    async fn refresh_needs_a_token() {
        let response = send(empty_request(Method::POST, "/api/charts/streams/refresh")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_category_is_rejected() {
        let response = send(empty_request(Method::GET, "/api/charts/loudest/history")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trending_limit_is_bounded() {
        let response = send(empty_request(Method::GET, "/api/charts/trending?limit=0")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
