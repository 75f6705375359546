use std::sync::LazyLock;

use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::{info, instrument};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use crate::{
    models::users::{NewUser, PrivateUser, User},
    util::{
        errors::{IntoRouteError, RouteError, SimpleRouteErrorOutput},
        jwt::{AuthBody, Claims, TokenProfile},
        password::{hash_password, verify_password},
        validator::ValidatedJson,
    },
    AppState,
};

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("username regex should compile"));

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(register))
        .routes(routes!(login))
        .routes(routes!(logout))
        .routes(routes!(get_self))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    #[serde(flatten)]
    token: AuthBody,
    user: PrivateUser,
}

fn issue_token(user: User, state: &AppState) -> Result<AuthResponse, RouteError> {
    let claims = Claims::new(
        TokenProfile::from(&user),
        Duration::hours(state.config.main.token_ttl_hours),
    );
    let token = claims
        .encode(&state.jwt_keys)
        .http_internal_error("Failed to issue token")?;

    Ok(AuthResponse {
        token: AuthBody::new(token),
        user: user.into(),
    })
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    #[validate(length(min = 3, max = 32), regex(path = *USERNAME_REGEX))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 256))]
    password: String,
    #[validate(length(min = 1, max = 64))]
    display_name: Option<String>,
}

/// Create an account
#[utoipa::path(
    method(post),
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = OK, description = "Success", body = AuthResponse, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = CONFLICT, description = "Username or email taken", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip_all, fields(username = %payload.username), err(Debug))]
async fn register(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, RouteError> {
    let password_hash = hash_password(&payload.password)?;

    let mut conn = state.db.get().await?;
    let user = NewUser::new(
        &payload.username,
        &payload.email.to_lowercase(),
        &password_hash,
        payload.display_name.as_deref(),
    )
    .insert(&mut conn)
    .await
    .map_err(|e| {
        let err = RouteError::from(e);
        if err.status() == StatusCode::CONFLICT {
            RouteError::new_conflict().set_public_error_message("Username or email is already taken")
        } else {
            err
        }
    })?;

    info!(user_id = user.id, "Registered new user");
    Ok(Json(issue_token(user, &state)?))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    #[validate(length(min = 1))]
    username: String,
    #[validate(length(min = 1))]
    password: String,
}

/// Log in with username and password
#[utoipa::path(
    method(post),
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = OK, description = "Success", body = AuthResponse, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Wrong username or password", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip_all, fields(username = %payload.username), err(Debug))]
async fn login(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthResponse>, RouteError> {
    let mut conn = state.db.get().await?;
    let user: Option<User> = User::find_by_username(&payload.username)
        .first(&mut conn)
        .await
        .optional()?;

    // Unknown user and wrong password look the same from outside
    let Some(user) = user.filter(|user| verify_password(&payload.password, &user.password_hash))
    else {
        return Err(RouteError::new_unauthorized()
            .set_public_error_message("Wrong username or password"));
    };

    Ok(Json(issue_token(user, &state)?))
}

/// Log out, revoking the current token
#[utoipa::path(
    method(post),
    path = "/logout",
    responses(
        (status = OK, description = "Success"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip_all, fields(user_id = claims.profile.id), err(Debug))]
async fn logout(State(state): State<AppState>, claims: Claims) -> Result<(), RouteError> {
    claims.revoke(&state.redis).await?;
    Ok(())
}

/// Get own profile
#[utoipa::path(
    method(get),
    path = "/self",
    responses(
        (status = OK, description = "Success", body = PrivateUser, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip_all, err(Debug))]
async fn get_self(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<PrivateUser>, RouteError> {
    use crate::schema::users;

    let mut conn = state.db.get().await?;
    let user: User = users::table
        .find(claims.profile.id)
        .first(&mut conn)
        .await?;

    Ok(Json(user.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use validator::Validate;

    use super::RegisterRequest;
    use crate::api::tests::{body_json, json_request, send};

    fn register_request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_owned(),
            email: email.to_owned(),
            password: password.to_owned(),
            display_name: None,
        }
    }

    #[test]
    fn accepts_reasonable_registration() {
        assert!(register_request("night_owl", "owl@example.com", "hunter22!").validate().is_ok());
    }

    #[test]
    fn rejects_bad_usernames() {
        assert!(register_request("ab", "a@example.com", "password1").validate().is_err());
        assert!(register_request("has space", "a@example.com", "password1").validate().is_err());
        assert!(register_request(&"x".repeat(33), "a@example.com", "password1").validate().is_err());
    }

    #[test]
    fn rejects_short_password_and_bad_email() {
        assert!(register_request("valid_name", "a@example.com", "short").validate().is_err());
        assert!(register_request("valid_name", "not-an-email", "password1").validate().is_err());
    }

    #[tokio::test]
    async fn invalid_registration_is_a_bad_request() {
        let response = send(json_request(
            Method::POST,
            "/api/auth/register",
            &json!({"username": "a", "email": "nope", "password": "x"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Body validation error"));
    }

    #[tokio::test]
    async fn missing_fields_are_a_bad_request() {
        let response = send(json_request(
            Method::POST,
            "/api/auth/login",
            &json!({"username": "someone"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
