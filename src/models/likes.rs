use diesel::prelude::*;
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use time::OffsetDateTime;

use super::{tracks::Track, users::User};
use crate::schema::track_likes;

#[derive(Queryable, Selectable, Identifiable, Associations, Debug)]
#[diesel(belongs_to(User))]
#[diesel(belongs_to(Track))]
#[diesel(table_name = track_likes, check_for_backend(diesel::pg::Pg))]
#[diesel(primary_key(user_id, track_id))]
pub struct TrackLike {
    pub user_id: i32,
    pub track_id: i32,
    pub created_at: OffsetDateTime,
}

impl TrackLike {
    /// Likes the track if the user hasn't yet, otherwise removes the like.
    ///
    /// # Returns
    /// Whether the track is liked after the call.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn toggle(
        liker_id: i32,
        liked_track_id: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<bool> {
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                use crate::schema::track_likes::dsl::*;

                let removed = diesel::delete(
                    track_likes
                        .filter(user_id.eq(liker_id))
                        .filter(track_id.eq(liked_track_id)),
                )
                .execute(conn)
                .await?;
                if removed > 0 {
                    return Ok(false);
                }

                diesel::insert_into(track_likes)
                    .values((user_id.eq(liker_id), track_id.eq(liked_track_id)))
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;
                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }

    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn exists(
        liker_id: i32,
        liked_track_id: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<bool> {
        use crate::schema::track_likes::dsl::*;

        diesel::select(diesel::dsl::exists(
            track_likes
                .filter(user_id.eq(liker_id))
                .filter(track_id.eq(liked_track_id)),
        ))
        .get_result(conn)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::TrackLike;
    use crate::models::test_db;

    #[tokio::test]
    async fn toggle_alternates_between_liked_and_unliked() {
        let Some(mut conn) = test_db::connection().await else {
            return;
        };
        let listener = test_db::user("liker", &mut conn).await;
        let track = test_db::track("Hold On", "Night Tapes", &mut conn).await;

        assert!(!TrackLike::exists(listener.id, track.id, &mut conn).await.unwrap());
        for expected in [true, false, true] {
            let liked = TrackLike::toggle(listener.id, track.id, &mut conn).await.unwrap();
            assert_eq!(liked, expected);
            assert_eq!(
                TrackLike::exists(listener.id, track.id, &mut conn).await.unwrap(),
                expected
            );
        }
    }
}
