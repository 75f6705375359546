use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::schema::stream_events;

/// One play of a track.
#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = stream_events, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub id: i64,
    pub track_id: i32,
    pub user_id: Option<i32>,
    pub duration_played_secs: i32,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub streamed_at: OffsetDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = stream_events)]
pub struct NewStreamEvent {
    pub track_id: i32,
    pub user_id: Option<i32>,
    pub duration_played_secs: i32,
}

impl NewStreamEvent {
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn insert(&self, conn: &mut AsyncPgConnection) -> QueryResult<StreamEvent> {
        diesel::insert_into(stream_events::table)
            .values(self)
            .get_result(conn)
            .await
    }
}
