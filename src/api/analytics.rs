use axum::{
    extract::{Path, State},
    Json,
};
use diesel::{
    prelude::*,
    sql_types::{BigInt, Integer, Text, Timestamptz},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::{artists::find_artist, tracks::find_track};
use crate::{
    models::tips::TippingTransaction,
    util::errors::{RouteError, SimpleRouteErrorOutput},
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_overview))
        .routes(routes!(get_track_stats))
        .routes(routes!(get_artist_stats))
}

const DAILY_STREAMS_QUERY: &str = "\
SELECT to_char(streamed_at AT TIME ZONE 'UTC', 'YYYY-MM-DD') AS day, COUNT(*) AS streams
FROM stream_events
WHERE track_id = $1 AND streamed_at >= $2
GROUP BY day
ORDER BY day ASC";

const TOP_TRACKS_QUERY: &str = "\
SELECT t.id AS track_id, t.title, COUNT(se.id) AS streams
FROM tracks t
LEFT JOIN stream_events se ON se.track_id = t.id
WHERE t.artist_id = $1
GROUP BY t.id, t.title
ORDER BY streams DESC, t.id ASC
LIMIT 5";

#[derive(Serialize, Default, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
struct Overview {
    users: i64,
    tracks: i64,
    artists: i64,
    streams: i64,
    likes: i64,
    tips_cents: i64,
    streams_last_7_days: i64,
}

async fn compute_overview(conn: &mut AsyncPgConnection) -> QueryResult<Overview> {
    use crate::schema::{
        artists, stream_events, tipping_transactions, track_likes, tracks, users,
    };

    let week_ago = OffsetDateTime::now_utc() - Duration::days(7);
    let tips_cents: Option<i64> = tipping_transactions::table
        .select(diesel::dsl::sum(tipping_transactions::amount_cents))
        .first(conn)
        .await?;

    Ok(Overview {
        users: users::table.count().get_result(conn).await?,
        tracks: tracks::table.count().get_result(conn).await?,
        artists: artists::table.count().get_result(conn).await?,
        streams: stream_events::table.count().get_result(conn).await?,
        likes: track_likes::table.count().get_result(conn).await?,
        tips_cents: tips_cents.unwrap_or(0),
        streams_last_7_days: stream_events::table
            .filter(stream_events::streamed_at.ge(week_ago))
            .count()
            .get_result(conn)
            .await?,
    })
}

/// Get platform-wide totals
///
/// Never fails: when the numbers can't be computed, every field is zero.
#[utoipa::path(
    method(get),
    path = "/overview",
    responses(
        (status = OK, description = "Success", body = Overview, content_type = "application/json")
    )
)]
#[instrument(skip(state))]
async fn get_overview(State(state): State<AppState>) -> Json<Overview> {
    let overview = match state.db.get().await {
        Ok(mut conn) => compute_overview(&mut conn)
            .await
            .inspect_err(|e| warn!("Failed to compute overview: {e}"))
            .unwrap_or_default(),
        Err(e) => {
            warn!("No connection for overview: {e}");
            Overview::default()
        }
    };

    Json(overview)
}

#[derive(QueryableByName, Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
struct DailyStreams {
    /// `YYYY-MM-DD`, UTC
    #[diesel(sql_type = Text)]
    day: String,
    #[diesel(sql_type = BigInt)]
    streams: i64,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
struct TrackStats {
    track_id: i32,
    streams: i64,
    unique_listeners: i64,
    likes: i64,
    seconds_played: i64,
    /// Last 30 days, oldest first. Days without streams are left out.
    daily: Vec<DailyStreams>,
}

/// Get listening stats for a track
#[utoipa::path(
    method(get),
    path = "/tracks/{id}",
    params(
        ("id" = i32, Path, description = "ID of track"),
    ),
    responses(
        (status = OK, description = "Success", body = TrackStats, content_type = "application/json"),
        (status = NOT_FOUND, description = "Track not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_track_stats(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<TrackStats>, RouteError> {
    use crate::schema::stream_events;

    let mut conn = state.db.get().await?;
    let track = find_track(id, &mut conn).await?;

    let of_track = || stream_events::table.filter(stream_events::track_id.eq(track.id));
    let streams: i64 = of_track().count().get_result(&mut conn).await?;
    let unique_listeners: i64 = of_track()
        .select(diesel::dsl::count_distinct(stream_events::user_id))
        .get_result(&mut conn)
        .await?;
    let seconds_played: Option<i64> = of_track()
        .select(diesel::dsl::sum(stream_events::duration_played_secs))
        .first(&mut conn)
        .await?;
    let likes = track.like_count(&mut conn).await?;

    let daily: Vec<DailyStreams> = diesel::sql_query(DAILY_STREAMS_QUERY)
        .bind::<Integer, _>(track.id)
        .bind::<Timestamptz, _>(OffsetDateTime::now_utc() - Duration::days(30))
        .load(&mut conn)
        .await?;

    Ok(Json(TrackStats {
        track_id: track.id,
        streams,
        unique_listeners,
        likes,
        seconds_played: seconds_played.unwrap_or(0),
        daily,
    }))
}

#[derive(QueryableByName, Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
struct TopTrack {
    #[diesel(sql_type = Integer)]
    track_id: i32,
    #[diesel(sql_type = Text)]
    title: String,
    #[diesel(sql_type = BigInt)]
    streams: i64,
}

#[derive(Serialize, Default, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ArtistStats {
    artist_id: i32,
    streams: i64,
    tips_cents: i64,
    tip_count: i64,
    top_tracks: Vec<TopTrack>,
}

async fn compute_artist_stats(
    artist_id: i32,
    conn: &mut AsyncPgConnection,
) -> QueryResult<ArtistStats> {
    use crate::schema::{stream_events, tipping_transactions, tracks};

    let streams: i64 = stream_events::table
        .inner_join(tracks::table)
        .filter(tracks::artist_id.eq(artist_id))
        .count()
        .get_result(conn)
        .await?;
    let tip_count: i64 = tipping_transactions::table
        .filter(tipping_transactions::artist_id.eq(artist_id))
        .count()
        .get_result(conn)
        .await?;
    let tips_cents = TippingTransaction::total_for_artist(artist_id, conn).await?;
    let top_tracks = diesel::sql_query(TOP_TRACKS_QUERY)
        .bind::<Integer, _>(artist_id)
        .load(conn)
        .await?;

    Ok(ArtistStats {
        artist_id,
        streams,
        tips_cents,
        tip_count,
        top_tracks,
    })
}

/// Get stats for an artist
///
/// When the numbers can't be computed, the artist still gets a zeroed payload.
#[utoipa::path(
    method(get),
    path = "/artists/{id}",
    params(
        ("id" = i32, Path, description = "ID of artist"),
    ),
    responses(
        (status = OK, description = "Success", body = ArtistStats, content_type = "application/json"),
        (status = NOT_FOUND, description = "Artist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_artist_stats(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ArtistStats>, RouteError> {
    let mut conn = state.db.get().await?;
    let artist = find_artist(id, &mut conn).await?;

    let stats = compute_artist_stats(artist.id, &mut conn)
        .await
        .unwrap_or_else(|e| {
            warn!(artist_id = artist.id, "Failed to compute artist stats: {e}");
            ArtistStats {
                artist_id: artist.id,
                ..ArtistStats::default()
            }
        });

    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::Overview;
    use crate::api::tests::{body_json, empty_request, send};

    #[tokio::test]
    async fn overview_degrades_to_zeroes() {
        // The test database is unreachable, so every count fails
        let response = send(empty_request(Method::GET, "/api/analytics/overview")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body, serde_json::to_value(Overview::default()).unwrap());
        assert_eq!(body["streamsLast7Days"], 0);
    }
}
