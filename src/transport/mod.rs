//! Subscriber Transports
//!
//! Thin adapters between long-lived client connections and the hub. The hub
//! only sees "deliver these bytes" and "this subscriber went away"; framing
//! lives here.
//!
//! - **WebSocket** (`/api/v1/ws`): UTF-8 payloads as text frames, anything
//!   else as binary frames
//! - **Server-Sent Events** (`/api/v1/events`): each payload as one
//!   `data:` event
//!
//! Both send an optional one-shot snapshot of upstream state before the
//! first relayed payload.

mod messages;
mod sse;
mod websocket;

pub use messages::ServerMessage;
pub use sse::sse_handler;
pub use websocket::{websocket_handler, WebSocketSink};
