use std::sync::LazyLock;

use axum::{
    extract::{Path, State},
    Json,
};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};
use validator::Validate;

use super::artists::find_artist;
use crate::{
    models::{
        activities::NewActivity,
        tips::{NewTip, TippingTransaction},
    },
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        jwt::Claims,
        query::{PageParams, Paginated},
        validator::{ValidatedJson, ValidatedQuery},
    },
    AppState,
};

static CURRENCY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("currency regex should compile"));

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(send_tip))
        .routes(routes!(get_sent_tips))
        .routes(routes!(get_artist_tips))
}

#[derive(Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
struct TipRequest {
    artist_id: i32,
    #[validate(range(min = 1, max = 100_000))]
    amount_cents: i32,
    /// ISO 4217 code, like `EUR`
    #[validate(regex(path = *CURRENCY_REGEX))]
    currency: String,
    #[validate(length(max = 280))]
    message: Option<String>,
}

/// Tip an artist
#[utoipa::path(
    method(post),
    path = "/",
    request_body = TipRequest,
    responses(
        (status = OK, description = "Success", body = TippingTransaction, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters or tipping yourself", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Artist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims, payload), fields(user_id = claims.profile.id), err(Debug))]
async fn send_tip(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedJson(payload): ValidatedJson<TipRequest>,
) -> Result<Json<TippingTransaction>, RouteError> {
    let mut conn = state.db.get().await?;
    let artist = find_artist(payload.artist_id, &mut conn).await?;
    if artist.user_id == Some(claims.profile.id) {
        return Err(RouteError::new_bad_request().set_public_error_message("You can't tip yourself"));
    }

    let tip = NewTip {
        from_user_id: claims.profile.id,
        artist_id: artist.id,
        amount_cents: payload.amount_cents,
        currency: &payload.currency,
        message: payload.message.as_deref(),
    }
    .insert(&mut conn)
    .await?;
    info!(
        tip_id = tip.id,
        artist_id = artist.id,
        amount_cents = tip.amount_cents,
        "Recorded tip"
    );

    NewActivity::tipped(claims.profile.id, artist.id)
        .record_or_warn(&mut conn, &state.live)
        .await;

    Ok(Json(tip))
}

/// Get tips you sent, newest first
#[utoipa::path(
    method(get),
    path = "/self",
    params(PageParams),
    responses(
        (status = OK, description = "Success", body = Paginated<TippingTransaction>, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = UNAUTHORIZED, description = "Unauthorized", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    ),
    security(
        ("token_jwt" = [])
    )
)]
#[instrument(skip(state, claims), fields(user_id = claims.profile.id), err(Debug))]
async fn get_sent_tips(
    State(state): State<AppState>,
    claims: Claims,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<Paginated<TippingTransaction>>, RouteError> {
    use crate::schema::tipping_transactions;

    let mut conn = state.db.get().await?;
    let total: i64 = tipping_transactions::table
        .filter(tipping_transactions::from_user_id.eq(claims.profile.id))
        .count()
        .get_result(&mut conn)
        .await?;
    let results = tipping_transactions::table
        .filter(tipping_transactions::from_user_id.eq(claims.profile.id))
        .order(tipping_transactions::created_at.desc())
        .offset(page.offset())
        .limit(page.limit())
        .load(&mut conn)
        .await?;

    Ok(Json(Paginated { results, total }))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
struct ArtistTipsResponse {
    #[serde(flatten)]
    page: Paginated<TippingTransaction>,
    /// Sum over every tip, not just this page
    total_cents: i64,
}

/// Get tips an artist received
#[utoipa::path(
    method(get),
    path = "/artists/{id}",
    params(
        ("id" = i32, Path, description = "ID of artist"),
        PageParams
    ),
    responses(
        (status = OK, description = "Success", body = ArtistTipsResponse, content_type = "application/json"),
        (status = BAD_REQUEST, description = "Invalid parameters", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = NOT_FOUND, description = "Artist not found", body = SimpleRouteErrorOutput, content_type = "application/json"),
        (status = INTERNAL_SERVER_ERROR, description = "Miscellaneous error", body = SimpleRouteErrorOutput)
    )
)]
#[instrument(skip(state), err(Debug))]
async fn get_artist_tips(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    ValidatedQuery(page): ValidatedQuery<PageParams>,
) -> Result<Json<ArtistTipsResponse>, RouteError> {
    use crate::schema::tipping_transactions;

    let mut conn = state.db.get().await?;
    let artist = find_artist(id, &mut conn).await?;

    let total: i64 = TippingTransaction::belonging_to(&artist)
        .count()
        .get_result(&mut conn)
        .await?;
    let results = TippingTransaction::belonging_to(&artist)
        .order(tipping_transactions::created_at.desc())
        .select(TippingTransaction::as_select())
        .offset(page.offset())
        .limit(page.limit())
        .load(&mut conn)
        .await?;
    let total_cents = TippingTransaction::total_for_artist(artist.id, &mut conn).await?;

    Ok(Json(ArtistTipsResponse {
        page: Paginated { results, total },
        total_cents,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use validator::Validate;

    use super::TipRequest;
    use crate::api::tests::{json_request, send};

    fn tip(amount_cents: i32, currency: &str) -> TipRequest {
        TipRequest {
            artist_id: 1,
            amount_cents,
            currency: currency.to_owned(),
            message: None,
        }
    }

    #[test]
    fn amounts_and_currencies_are_checked() {
        assert!(tip(500, "EUR").validate().is_ok());
        assert!(tip(0, "EUR").validate().is_err());
        assert!(tip(100_001, "EUR").validate().is_err());
        assert!(tip(500, "eur").validate().is_err());
        assert!(tip(500, "EURO").validate().is_err());
    }

    #[tokio::test]
    async fn tipping_needs_a_token() {
        let response = send(json_request(
            Method::POST,
            "/api/tips",
            &json!({"artistId": 1, "amountCents": 100, "currency": "USD"}),
        ))
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
