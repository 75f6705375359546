use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::{
    util::{
        errors::{RouteError, SimpleRouteErrorOutput},
        live::{is_known_channel, LiveEvent},
    },
    AppState,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(subscribe))
}

fn to_sse(event: &LiveEvent) -> Option<Event> {
    Event::default()
        .event(&event.event)
        .json_data(&event.data)
        .inspect_err(|e| warn!("Failed to encode live event {}: {e}", event.event))
        .ok()
}

/// Subscribe to a live channel as a server-sent event stream
///
/// Channels are `activity`, `charts` and `user:{id}`.
/// Events are named after what happened and carry it as JSON.
#[utoipa::path(
    method(get),
    path = "/{channel}",
    params(
        ("channel" = String, Path, description = "Channel to subscribe to"),
    ),
    responses(
        (status = OK, description = "Event stream", content_type = "text/event-stream"),
        (status = NOT_FOUND, description = "Unknown channel", body = SimpleRouteErrorOutput, content_type = "application/json")
    )
)]
async fn subscribe(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RouteError> {
    if !is_known_channel(&channel) {
        return Err(RouteError::new_not_found().set_public_error_message("Unknown channel"));
    }

    info!(channel, "Live subscriber connected");
    let stream = BroadcastStream::new(state.live.subscribe(&channel)).filter_map(move |item| {
        let event = match item {
            Ok(event) => to_sse(&event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(channel, skipped, "Live subscriber lagged behind");
                None
            }
        };
        std::future::ready(event.map(Ok))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use crate::api::tests::{empty_request, send};

    #[tokio::test]
    async fn unknown_channels_are_not_found() {
        for uri in ["/api/live/everything", "/api/live/user:abc", "/api/live/user:0"] {
            let response = send(empty_request(Method::GET, uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn known_channels_stream_events() {
        let response = send(empty_request(Method::GET, "/api/live/charts")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
    }
}
