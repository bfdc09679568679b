//! WebSocket Transport
//!
//! Upgrades the HTTP connection, sends the optional snapshot, then hands the
//! write half to a delivery worker. The read half only watches for the peer
//! going away.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::messages::ServerMessage;
use crate::api::AppState;
use crate::hub::{DeliveryError, PayloadSink};

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let subscription = match state.hub.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected WebSocket subscriber");
            if let Ok(payload) = ServerMessage::error(e.to_string()).to_bytes() {
                let _ = sender.send(frame(payload)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };
    let id = subscription.id();

    // Broadcasts arriving meanwhile wait in the queue behind the snapshot
    if let Some(snapshot) = state.snapshot().await {
        if sender.send(frame(snapshot)).await.is_err() {
            tracing::debug!(subscriber_id = id, "Failed to send snapshot");
            return;
        }
    }

    let handle = subscription.forward_to(WebSocketSink::new(sender));
    let closed = handle.close_signal();

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(subscriber_id = id, "Peer closed WebSocket");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(subscriber_id = id, error = %e, "WebSocket receive error");
                    break;
                }
                // Inbound frames carry nothing for the hub
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unregister(id);
}

/// Text frame for UTF-8 payloads, binary frame otherwise
fn frame(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

/// Write half of a WebSocket as a delivery sink
pub struct WebSocketSink {
    sender: SplitSink<WebSocket, Message>,
}

impl WebSocketSink {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl PayloadSink for WebSocketSink {
    async fn deliver(&mut self, payload: Bytes) -> Result<(), DeliveryError> {
        self.sender
            .send(frame(payload))
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sender.close().await;
    }
}
