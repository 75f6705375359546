use diesel::{
    prelude::*,
    sql_types::{BigInt, Integer, Text, Timestamptz},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    schema::ranking_snapshots,
    util::{
        jam_types::{ChartCategory, SubmissionStatus},
        week::WeekKey,
    },
};

const STREAMS_QUERY: &str = "\
SELECT t.id AS track_id, t.title, a.name AS artist, COUNT(se.id) AS score
FROM stream_events se
JOIN tracks t ON t.id = se.track_id
JOIN artists a ON a.id = t.artist_id
WHERE se.streamed_at >= $1 AND se.streamed_at < $2
GROUP BY t.id, t.title, a.name
ORDER BY score DESC, t.id ASC
LIMIT $3";

const LIKES_QUERY: &str = "\
SELECT t.id AS track_id, t.title, a.name AS artist, COUNT(*) AS score
FROM track_likes tl
JOIN tracks t ON t.id = tl.track_id
JOIN artists a ON a.id = t.artist_id
WHERE tl.created_at >= $1 AND tl.created_at < $2
GROUP BY t.id, t.title, a.name
ORDER BY score DESC, t.id ASC
LIMIT $3";

const FRESH_QUERY: &str = "\
SELECT t.id AS track_id, t.title, a.name AS artist, COUNT(se.id) AS score
FROM tracks t
JOIN artists a ON a.id = t.artist_id
LEFT JOIN stream_events se
    ON se.track_id = t.id AND se.streamed_at >= $1 AND se.streamed_at < $2
WHERE t.id IN (
    SELECT ws.track_id FROM weekly_submissions ws
    WHERE ws.week_key = $4 AND ws.category = 'fresh' AND ws.status = $5
)
GROUP BY t.id, t.title, a.name
ORDER BY score DESC, t.id ASC
LIMIT $3";

/// One row of the ranking query, before ranks are assigned.
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq)]
pub struct ChartRow {
    #[diesel(sql_type = Integer)]
    pub track_id: i32,
    #[diesel(sql_type = Text)]
    pub title: String,
    #[diesel(sql_type = Text)]
    pub artist: String,
    #[diesel(sql_type = BigInt)]
    pub score: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub rank: u32,
    pub track_id: i32,
    pub title: String,
    pub artist: String,
    pub score: i64,
}

/// Numbers rows from 1 in the order the query returned them.
#[must_use]
pub fn rank_rows(rows: Vec<ChartRow>) -> Vec<ChartEntry> {
    (1u32..)
        .zip(rows)
        .map(|(rank, row)| ChartEntry {
            rank,
            track_id: row.track_id,
            title: row.title,
            artist: row.artist,
            score: row.score,
        })
        .collect()
}

/// A stored chart computation.
#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = ranking_snapshots, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct RankingSnapshot {
    pub id: i32,
    pub category: String,
    pub week_key: String,
    #[schema(value_type = Vec<ChartEntry>)]
    pub entries: serde_json::Value,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub computed_at: OffsetDateTime,
}

/// Snapshot listing without the entries.
#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = ranking_snapshots, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct RankingSnapshotMeta {
    pub id: i32,
    pub category: String,
    pub week_key: String,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub computed_at: OffsetDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = ranking_snapshots)]
struct NewRankingSnapshot<'a> {
    category: &'a str,
    week_key: String,
    entries: serde_json::Value,
}

impl RankingSnapshot {
    /// Runs the ranking query for a category and week.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn compute(
        category: ChartCategory,
        week: WeekKey,
        size: i64,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Vec<ChartEntry>> {
        let rows: Vec<ChartRow> = match category {
            ChartCategory::Streams => {
                diesel::sql_query(STREAMS_QUERY)
                    .bind::<Timestamptz, _>(week.start())
                    .bind::<Timestamptz, _>(week.end())
                    .bind::<BigInt, _>(size)
                    .load(conn)
                    .await?
            }
            ChartCategory::Likes => {
                diesel::sql_query(LIKES_QUERY)
                    .bind::<Timestamptz, _>(week.start())
                    .bind::<Timestamptz, _>(week.end())
                    .bind::<BigInt, _>(size)
                    .load(conn)
                    .await?
            }
            ChartCategory::Fresh => {
                diesel::sql_query(FRESH_QUERY)
                    .bind::<Timestamptz, _>(week.start())
                    .bind::<Timestamptz, _>(week.end())
                    .bind::<BigInt, _>(size)
                    .bind::<Text, _>(week.to_string())
                    .bind::<diesel::sql_types::SmallInt, _>(i16::from(SubmissionStatus::Approved))
                    .load(conn)
                    .await?
            }
        };
        Ok(rank_rows(rows))
    }

    /// Computes the chart and stores it as a new snapshot. Every call writes exactly one row.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn refresh(
        category: ChartCategory,
        week: WeekKey,
        size: i64,
        conn: &mut AsyncPgConnection,
    ) -> anyhow::Result<Self> {
        let entries = Self::compute(category, week, size, conn).await?;
        info!(%category, %week, entries = entries.len(), "Refreshing chart");

        let snapshot = diesel::insert_into(ranking_snapshots::table)
            .values(NewRankingSnapshot {
                category: category.as_str(),
                week_key: week.to_string(),
                entries: serde_json::to_value(&entries)?,
            })
            .get_result(conn)
            .await?;
        Ok(snapshot)
    }

    /// Newest snapshot for a category, optionally restricted to one week.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn latest(
        category: ChartCategory,
        week: Option<WeekKey>,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Option<Self>> {
        let mut query = ranking_snapshots::table
            .filter(ranking_snapshots::category.eq(category.as_str()))
            .into_boxed();
        if let Some(week) = week {
            query = query.filter(ranking_snapshots::week_key.eq(week.to_string()));
        }

        query
            .order((
                ranking_snapshots::computed_at.desc(),
                ranking_snapshots::id.desc(),
            ))
            .first(conn)
            .await
            .optional()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;

    async fn snapshot_count(category: ChartCategory, conn: &mut AsyncPgConnection) -> i64 {
        ranking_snapshots::table
            .filter(ranking_snapshots::category.eq(category.as_str()))
            .count()
            .get_result(conn)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn refresh_writes_exactly_one_snapshot() {
        let Some(mut conn) = test_db::connection().await else {
            return;
        };
        let listener = test_db::user("charter", &mut conn).await;
        let track = test_db::track("Chart Topper", "Tapes", &mut conn).await;
        diesel::insert_into(crate::schema::track_likes::table)
            .values((
                crate::schema::track_likes::user_id.eq(listener.id),
                crate::schema::track_likes::track_id.eq(track.id),
            ))
            .execute(&mut conn)
            .await
            .unwrap();

        let week = WeekKey::current();
        let before = snapshot_count(ChartCategory::Likes, &mut conn).await;
        let snapshot = RankingSnapshot::refresh(ChartCategory::Likes, week, 10, &mut conn)
            .await
            .unwrap();
        assert_eq!(snapshot_count(ChartCategory::Likes, &mut conn).await, before + 1);

        let entries: Vec<ChartEntry> = serde_json::from_value(snapshot.entries).unwrap();
        assert!(entries.iter().any(|entry| entry.track_id == track.id && entry.score == 1));
        assert_eq!(entries.as_slice().first().map(|entry| entry.rank), Some(1));

        let latest = RankingSnapshot::latest(ChartCategory::Likes, Some(week), &mut conn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, snapshot.id);
    }

    fn row(track_id: i32, score: i64) -> ChartRow {
        ChartRow {
            track_id,
            title: format!("Track {track_id}"),
            artist: "Someone".to_owned(),
            score,
        }
    }

    #[test]
    fn ranks_start_at_one_and_follow_query_order() {
        let entries = rank_rows(vec![row(4, 30), row(2, 12), row(9, 12)]);
        let ranks: Vec<(u32, i32)> = entries.iter().map(|e| (e.rank, e.track_id)).collect();
        assert_eq!(ranks, vec![(1, 4), (2, 2), (3, 9)]);
    }

    #[test]
    fn empty_chart_has_no_entries() {
        assert!(rank_rows(Vec::new()).is_empty());
    }

    #[test]
    fn entries_serialize_camel_case() {
        let json = serde_json::to_value(rank_rows(vec![row(1, 5)])).unwrap();
        assert_eq!(json[0]["trackId"], 1);
        assert_eq!(json[0]["rank"], 1);
    }
}
