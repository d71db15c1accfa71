// src/routes/viewer.rs
use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Extension, Json,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::models::KeepalivePing;
use crate::services::{Delivery, SubscriberFeed};
use crate::state::AppState;

/// Event name viewers listen on, for batches and keepalives alike.
pub const UPDATE_EVENT: &str = "posupdate";

/// Full registry dump a viewer loads before following `/people`.
pub async fn bootstrap(Extension(app_state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let users = app_state.tracker.registry().snapshot_all().await;
    info!(users = users.len(), "bootstrap: export done");
    ([(header::CACHE_CONTROL, "no-cache")], Json(users))
}

/// Long-lived event stream of changed users.
pub async fn people(
    Extension(app_state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let real_ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    info!(peer = %addr, real_ip, "viewer connected");

    let feed = app_state.tracker.subscribe(addr.to_string());
    ([(header::CACHE_CONTROL, "no-cache")], Sse::new(event_stream(feed)))
}

// The feed, and with it the subscription, is dropped when the client goes
// away and axum stops polling the stream.
fn event_stream(feed: SubscriberFeed) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(feed, |mut feed| async move {
        let event = match feed.next_delivery().await {
            Delivery::Batch(batch) => {
                debug!(
                    peer = feed.subscription().peer(),
                    users = batch.len(),
                    "pushing updates to viewer"
                );
                update_event(&batch)
            }
            Delivery::Keepalive => update_event(KeepalivePing::default()),
        };

        match event {
            Ok(event) => Some((Ok(event), feed)),
            Err(e) => {
                error!(peer = feed.subscription().peer(), "failed to encode event: {}", e);
                None
            }
        }
    })
}

fn update_event<T: Serialize>(payload: T) -> Result<Event, axum::Error> {
    Event::default().event(UPDATE_EVENT).json_data(payload)
}
