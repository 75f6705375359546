use diesel::{
    prelude::*,
    sql_types::{Integer, Nullable},
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::schema::artists;

diesel::define_sql_function!(fn coalesce(x: Nullable<Integer>, y: Nullable<Integer>) -> Nullable<Integer>);

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[diesel(table_name = artists, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: i32,
    pub name: String,
    pub bio: Option<String>,
    pub image_url: Option<String>,
    /// Set when the artist is claimed by a JamFind account
    pub user_id: Option<i32>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = artists)]
pub struct NewArtist<'a> {
    pub name: &'a str,
    pub bio: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub user_id: Option<i32>,
}

impl<'a> NewArtist<'a> {
    #[must_use]
    pub const fn new(name: &'a str) -> Self {
        Self {
            name,
            bio: None,
            image_url: None,
            user_id: None,
        }
    }

    #[must_use]
    pub const fn claimed_by(mut self, user_id: i32) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub const fn with_image(mut self, image_url: Option<&'a str>) -> Self {
        self.image_url = image_url;
        self
    }

    /// Finds the artist with this name, creating it if needed.
    /// An existing artist keeps its data, except that an unclaimed artist gets claimed.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn find_or_create(&self, conn: &mut AsyncPgConnection) -> QueryResult<Artist> {
        use diesel::upsert::excluded;

        diesel::insert_into(artists::table)
            .values(self)
            .on_conflict(artists::name)
            .do_update()
            .set(artists::user_id.eq(coalesce(artists::user_id, excluded(artists::user_id))))
            .get_result(conn)
            .await
    }
}
