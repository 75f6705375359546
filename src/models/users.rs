use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{schema::users, util::jam_types::AccountType};

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = users, check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub account_type: AccountType,
    pub joined_at: OffsetDateTime,
}

impl User {
    #[must_use]
    pub fn find_by_username(name: &str) -> users::BoxedQuery<'_, diesel::pg::Pg> {
        users::table.filter(users::username.eq(name)).into_boxed()
    }

    /// Name shown for the user, falling back to the username.
    #[must_use]
    pub fn shown_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// What anyone can see about a user.
#[derive(Serialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i32,
    pub username: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub account_type: AccountType,
    #[serde(serialize_with = "time::serde::iso8601::serialize")]
    pub joined_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            bio: user.bio,
            avatar_url: user.avatar_url,
            account_type: user.account_type,
            joined_at: user.joined_at,
        }
    }
}

/// What a user can see about themselves.
#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateUser {
    #[serde(flatten)]
    pub public: PublicUser,
    pub email: String,
}

impl From<User> for PrivateUser {
    fn from(user: User) -> Self {
        let email = user.email.clone();
        Self {
            public: user.into(),
            email,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub display_name: Option<&'a str>,
}

impl<'a> NewUser<'a> {
    #[must_use]
    pub const fn new(
        username: &'a str,
        email: &'a str,
        password_hash: &'a str,
        display_name: Option<&'a str>,
    ) -> Self {
        Self {
            username,
            email,
            password_hash,
            display_name,
        }
    }

    /// Inserts the user.
    ///
    /// # Errors
    /// Fails with a unique violation if the username or email is taken.
    pub async fn insert(&self, conn: &mut AsyncPgConnection) -> QueryResult<User> {
        diesel::insert_into(users::table)
            .values(self)
            .get_result(conn)
            .await
    }
}

/// Profile fields a user can change. `None` leaves the column untouched.
#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
pub struct UserProfileChanges {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfileChanges {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.bio.is_none() && self.avatar_url.is_none()
    }
}
