// shamelessly stolen from https://www.shuttle.rs/blog/2024/02/21/using-jwt-auth-rust

use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{request::Parts, StatusCode},
    RequestPartsExt,
};
use axum_extra::{
    extract::CookieJar,
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use fred::{
    clients::Pool as RedisPool,
    prelude::KeysInterface,
    types::Expiration,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

use super::{
    errors::{IntoRouteError, RouteError},
    jam_types::AccountType,
};
use crate::{models::users::User, AppState};

#[derive(Clone)]
pub struct Keys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl Keys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthBody {
    access_token: String,
    token_type: String,
}

impl AuthBody {
    pub fn new(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
        }
    }
}

/// The slice of a user that travels inside the token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenProfile {
    pub id: i32,
    pub username: String,
    pub account_type: AccountType,
}

impl From<&User> for TokenProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            account_type: user.account_type,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub profile: TokenProfile,
    /// Token ID, used to revoke a token on logout
    pub jti: String,
    pub exp: i64,
}

impl Claims {
    #[must_use]
    pub fn new(profile: TokenProfile, ttl: Duration) -> Self {
        let jti: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();

        Self {
            profile,
            jti,
            exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        }
    }

    /// Signs the claims into a token.
    ///
    /// # Errors
    /// Fails if the token can't be encoded.
    pub fn encode(&self, keys: &Keys) -> anyhow::Result<String> {
        Ok(encode(&Header::default(), self, &keys.encoding)?)
    }

    /// Decodes and validates a token, including expiry.
    ///
    /// # Errors
    /// Fails if the signature is wrong, the token is malformed or expired.
    pub fn decode(token: &str, keys: &Keys) -> anyhow::Result<Self> {
        Ok(decode::<Self>(token, &keys.decoding, &Validation::default())?.claims)
    }

    /// Checks the user's current account type. The one in the token may be stale
    /// if they were promoted or demoted since logging in.
    ///
    /// # Errors
    /// This fails if the query or DB connection fail.
    pub async fn is_staff(&self, conn: &mut AsyncPgConnection) -> QueryResult<bool> {
        use crate::schema::users;

        let current: Option<AccountType> = users::table
            .find(self.profile.id)
            .select(users::account_type)
            .first(conn)
            .await
            .optional()?;
        Ok(current.is_some_and(AccountType::is_staff))
    }

    /// Marks this token as unusable until it would have expired anyway.
    ///
    /// # Errors
    /// Fails if Redis can't be reached.
    pub async fn revoke(&self, redis: &RedisPool) -> anyhow::Result<()> {
        let remaining = self.exp - OffsetDateTime::now_utc().unix_timestamp();
        if remaining <= 0 {
            return Ok(());
        }
        let _: () = redis
            .set(
                revoked_key(&self.jti),
                1,
                Some(Expiration::EX(remaining)),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    async fn is_revoked(&self, redis: &RedisPool) -> anyhow::Result<bool> {
        let count: i64 = redis.exists(revoked_key(&self.jti)).await?;
        Ok(count > 0)
    }
}

fn revoked_key(jti: &str) -> String {
    format!("revoked:{jti}")
}

/// Extracts the token from the authorization header, if it's not there, try the cookie
async fn find_token(parts: &mut Parts) -> Option<String> {
    if let Ok(bearer) = parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
        return Some(bearer.token().to_owned());
    }

    let jar = parts.extract::<CookieJar>().await.ok()?;
    jar.get("authorization")
        .map(|cookie| cookie.value().replace("Bearer ", ""))
}

async fn verify(token: &str, state: &AppState) -> Result<Claims, RouteError> {
    let claims = Claims::decode(token, &state.jwt_keys)
        .http_error("Invalid token", StatusCode::UNAUTHORIZED)?;

    if claims.is_revoked(&state.redis).await? {
        return Err(RouteError::new_unauthorized().set_public_error_message("Token was revoked"));
    }

    Ok(claims)
}

impl<S> FromRequestParts<S> for Claims
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = RouteError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let token = find_token(parts).await.ok_or_else(|| {
            RouteError::new_unauthorized().set_public_error_message("No token found")
        })?;

        verify(&token, &state).await
    }
}

/// Lets handlers accept `Option<Claims>` for endpoints that work anonymously.
/// A token that is present but invalid is still rejected.
impl<S> OptionalFromRequestParts<S> for Claims
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = RouteError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let state = AppState::from_ref(state);

        match find_token(parts).await {
            Some(token) => Ok(Some(verify(&token, &state).await?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> TokenProfile {
        TokenProfile {
            id: 7,
            username: "mira".to_owned(),
            account_type: AccountType::Moderator,
        }
    }

    #[test]
    fn token_round_trips() {
        let keys = Keys::new(b"test secret");
        let claims = Claims::new(profile(), Duration::hours(1));
        let token = claims.encode(&keys).unwrap();

        let decoded = Claims::decode(&token, &keys).unwrap();
        assert_eq!(decoded.profile, profile());
        assert_eq!(decoded.jti, claims.jti);
        assert!(decoded.profile.account_type.is_staff());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = Claims::new(profile(), Duration::hours(1));
        let token = claims.encode(&Keys::new(b"one")).unwrap();
        assert!(Claims::decode(&token, &Keys::new(b"two")).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = Keys::new(b"test secret");
        let claims = Claims::new(profile(), Duration::hours(-2));
        let token = claims.encode(&keys).unwrap();
        assert!(Claims::decode(&token, &keys).is_err());
    }

    #[test]
    fn token_ids_are_unique() {
        let a = Claims::new(profile(), Duration::hours(1));
        let b = Claims::new(profile(), Duration::hours(1));
        assert_ne!(a.jti, b.jti);
    }

    #[tokio::test]
    async fn staff_checks_use_the_current_account_type() {
        use crate::{models::test_db, schema::users};

        let Some(mut conn) = test_db::connection().await else {
            return;
        };
        let user = test_db::user("demoted", &mut conn).await;
        let claims = Claims::new(
            TokenProfile {
                id: user.id,
                username: user.username.clone(),
                account_type: AccountType::Moderator,
            },
            Duration::hours(1),
        );
        assert!(!claims.is_staff(&mut conn).await.unwrap());

        diesel::update(users::table.find(user.id))
            .set(users::account_type.eq(AccountType::Team))
            .execute(&mut conn)
            .await
            .unwrap();
        assert!(claims.is_staff(&mut conn).await.unwrap());
    }
}
