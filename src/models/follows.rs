use diesel::prelude::*;
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use time::OffsetDateTime;

use crate::schema::user_follows;

#[derive(Queryable, Selectable, Identifiable, Debug)]
#[diesel(table_name = user_follows, check_for_backend(diesel::pg::Pg))]
#[diesel(primary_key(follower_id, followee_id))]
pub struct UserFollow {
    pub follower_id: i32,
    pub followee_id: i32,
    pub created_at: OffsetDateTime,
}

impl UserFollow {
    /// Follows the user if not already following, otherwise unfollows.
    ///
    /// # Returns
    /// Whether `follower` follows `followee` after the call.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn toggle(
        follower: i32,
        followee: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<bool> {
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                use crate::schema::user_follows::dsl::*;

                let removed = diesel::delete(
                    user_follows
                        .filter(follower_id.eq(follower))
                        .filter(followee_id.eq(followee)),
                )
                .execute(conn)
                .await?;
                if removed > 0 {
                    return Ok(false);
                }

                diesel::insert_into(user_follows)
                    .values((follower_id.eq(follower), followee_id.eq(followee)))
                    .on_conflict_do_nothing()
                    .execute(conn)
                    .await?;
                Ok(true)
            }
            .scope_boxed()
        })
        .await
    }

    /// IDs of everyone the user follows.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn followee_ids(
        follower: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<Vec<i32>> {
        use crate::schema::user_follows::dsl::*;

        user_follows
            .filter(follower_id.eq(follower))
            .select(followee_id)
            .load(conn)
            .await
    }

    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn follower_count(user: i32, conn: &mut AsyncPgConnection) -> QueryResult<i64> {
        user_follows::table
            .filter(user_follows::followee_id.eq(user))
            .count()
            .get_result(conn)
            .await
    }

    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn following_count(user: i32, conn: &mut AsyncPgConnection) -> QueryResult<i64> {
        user_follows::table
            .filter(user_follows::follower_id.eq(user))
            .count()
            .get_result(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::UserFollow;
    use crate::models::test_db;

    #[tokio::test]
    async fn toggle_alternates_and_counts_follow() {
        let Some(mut conn) = test_db::connection().await else {
            return;
        };
        let fan = test_db::user("fan", &mut conn).await;
        let star = test_db::user("star", &mut conn).await;

        assert!(UserFollow::toggle(fan.id, star.id, &mut conn).await.unwrap());
        assert_eq!(UserFollow::follower_count(star.id, &mut conn).await.unwrap(), 1);
        assert_eq!(UserFollow::following_count(fan.id, &mut conn).await.unwrap(), 1);
        assert_eq!(
            UserFollow::followee_ids(fan.id, &mut conn).await.unwrap(),
            vec![star.id]
        );

        assert!(!UserFollow::toggle(fan.id, star.id, &mut conn).await.unwrap());
        assert_eq!(UserFollow::follower_count(star.id, &mut conn).await.unwrap(), 0);

        assert!(UserFollow::toggle(fan.id, star.id, &mut conn).await.unwrap());
    }
}
