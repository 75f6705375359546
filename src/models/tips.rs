use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::artists::Artist;
use crate::schema::tipping_transactions;

#[derive(Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone, ToSchema)]
#[diesel(belongs_to(Artist))]
#[diesel(table_name = tipping_transactions, check_for_backend(diesel::pg::Pg))]
#[serde(rename_all = "camelCase")]
pub struct TippingTransaction {
    pub id: i32,
    pub from_user_id: i32,
    pub artist_id: i32,
    pub amount_cents: i32,
    pub currency: String,
    pub message: Option<String>,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub created_at: OffsetDateTime,
}

impl TippingTransaction {
    /// Total cents an artist received.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn total_for_artist(
        target_artist: i32,
        conn: &mut AsyncPgConnection,
    ) -> QueryResult<i64> {
        use crate::schema::tipping_transactions::dsl::*;

        let total: Option<i64> = tipping_transactions
            .filter(artist_id.eq(target_artist))
            .select(diesel::dsl::sum(amount_cents))
            .first(conn)
            .await?;
        Ok(total.unwrap_or(0))
    }
}

#[derive(Insertable)]
#[diesel(table_name = tipping_transactions)]
pub struct NewTip<'a> {
    pub from_user_id: i32,
    pub artist_id: i32,
    pub amount_cents: i32,
    pub currency: &'a str,
    pub message: Option<&'a str>,
}

impl NewTip<'_> {
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn insert(&self, conn: &mut AsyncPgConnection) -> QueryResult<TippingTransaction> {
        diesel::insert_into(tipping_transactions::table)
            .values(self)
            .get_result(conn)
            .await
    }
}
