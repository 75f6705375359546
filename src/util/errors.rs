use axum::{
    extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

/// What clients see when a route fails.
#[derive(Debug, Serialize, ToSchema)]
pub struct SimpleRouteErrorOutput {
    pub error: String,
}

/// Error type returned by every route handler.
///
/// Carries the status code to answer with, an optional message that is safe to show
/// to clients, and the underlying error (if any) for logging.
#[derive(Debug)]
pub struct RouteError {
    source: Option<anyhow::Error>,
    status: StatusCode,
    public_error_message: Option<String>,
}

impl RouteError {
    #[must_use]
    pub const fn new(status: StatusCode) -> Self {
        Self {
            source: None,
            status,
            public_error_message: None,
        }
    }

    #[must_use]
    pub const fn new_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    #[must_use]
    pub const fn new_bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST)
    }

    #[must_use]
    pub const fn new_unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED)
    }

    #[must_use]
    pub const fn new_forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN)
    }

    #[must_use]
    pub const fn new_conflict() -> Self {
        Self::new(StatusCode::CONFLICT)
    }

    #[must_use]
    pub const fn new_bad_gateway() -> Self {
        Self::new(StatusCode::BAD_GATEWAY)
    }

    #[must_use]
    pub fn set_public_error_message(mut self, message: &str) -> Self {
        self.public_error_message = Some(message.to_owned());
        self
    }

    #[must_use]
    pub fn set_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    fn public_message(&self) -> String {
        self.public_error_message.clone().unwrap_or_else(|| {
            if self.status.is_server_error() {
                "An internal error occurred.".to_owned()
            } else {
                self.status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_owned()
            }
        })
    }
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.public_message(), self.status)
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, source = ?self.source, "Route failed");
        } else if let Some(source) = &self.source {
            warn!(status = %self.status, source = ?source, "Route rejected request");
        }

        let body = SimpleRouteErrorOutput {
            error: self.public_message(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl<E> From<E> for RouteError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err: anyhow::Error = err.into();
        let (status, public_error_message) = classify(&err);
        Self {
            source: Some(err),
            status,
            public_error_message,
        }
    }
}

/// Picks a status for errors bubbled up with `?`.
/// Database lookups that found nothing become 404s, extractor rejections keep their own status.
fn classify(err: &anyhow::Error) -> (StatusCode, Option<String>) {
    if let Some(diesel_err) = err.downcast_ref::<DieselError>() {
        return match diesel_err {
            DieselError::NotFound => (StatusCode::NOT_FOUND, None),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => (
                StatusCode::CONFLICT,
                Some("Resource already exists".to_owned()),
            ),
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => (
                StatusCode::BAD_REQUEST,
                Some("Referenced resource does not exist".to_owned()),
            ),
            DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, _) => (
                StatusCode::BAD_REQUEST,
                Some("Request violates a constraint".to_owned()),
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
    }
    if let Some(rejection) = err.downcast_ref::<JsonRejection>() {
        return (rejection.status(), Some(rejection.body_text()));
    }
    if let Some(rejection) = err.downcast_ref::<QueryRejection>() {
        return (rejection.status(), Some(rejection.body_text()));
    }
    if let Some(rejection) = err.downcast_ref::<FormRejection>() {
        return (rejection.status(), Some(rejection.body_text()));
    }
    if let Some(rejection) = err.downcast_ref::<PathRejection>() {
        return (rejection.status(), Some(rejection.body_text()));
    }
    (StatusCode::INTERNAL_SERVER_ERROR, None)
}

//shamelessly stolen from https://www.reddit.com/r/rust/comments/ozc0m8/an_actixanyhow_compatible_error_helper_i_found/
pub trait IntoRouteError<T> {
    fn http_error(self, message: &str, status_code: StatusCode) -> Result<T, RouteError>;

    fn http_internal_error(self, message: &str) -> Result<T, RouteError>
    where
        Self: std::marker::Sized,
    {
        self.http_error(message, StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl<T, E: std::fmt::Debug> IntoRouteError<T> for Result<T, E> {
    fn http_error(self, message: &str, status_code: StatusCode) -> Result<T, RouteError> {
        self.map_err(|err| {
            RouteError::new(status_code)
                .set_public_error_message(message)
                .set_source(anyhow::anyhow!("{err:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn diesel_not_found_becomes_404() {
        let err: RouteError = DieselError::NotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unique_violation_becomes_409() {
        let err: RouteError = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(String::from("duplicate key")),
        )
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unknown_errors_are_internal() {
        let err: RouteError = anyhow::anyhow!("boom").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let err: RouteError = anyhow::anyhow!("connection string leaked").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "An internal error occurred.");
    }

    #[tokio::test]
    async fn public_message_is_rendered() {
        let response = RouteError::new_conflict()
            .set_public_error_message("Already following")
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Already following");
    }

    #[test]
    fn http_error_keeps_status_and_message() {
        let result: Result<(), &str> = Err("bad");
        let err = result
            .http_error("Invalid token", StatusCode::UNAUTHORIZED)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.public_message(), "Invalid token");
    }
}
