//! Server-Sent Events Transport
//!
//! Streams the subscription directly as `data:` events. There is no inbound
//! path; the client going away drops the stream, which unregisters it.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;

use crate::api::{ApiError, AppState};

/// GET /api/v1/events
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state
        .hub
        .subscribe()
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    tracing::debug!(subscriber_id = subscription.id(), "SSE stream opened");

    let snapshot = state.snapshot().await;
    let initial = futures_util::stream::iter(
        snapshot.map(|payload| Ok::<_, Infallible>(event(&payload))),
    );
    let updates = subscription
        .into_stream()
        .map(|payload| Ok::<_, Infallible>(event(&payload)));

    Ok(Sse::new(initial.chain(updates)).keep_alive(KeepAlive::default()))
}

fn event(payload: &Bytes) -> Event {
    Event::default().data(event_data(payload))
}

fn event_data(payload: &Bytes) -> String {
    // SSE cannot carry carriage returns
    String::from_utf8_lossy(payload).replace('\r', "")
}
