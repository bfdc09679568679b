//! # Relay
//!
//! Real-time fan-out gateway. Upstream updates are pulled in by ingestors
//! and pushed to every connected WebSocket or Server-Sent Events client.
//!
//! ## Modules
//!
//! - [`hub`]: Subscriber set, broadcast, and per-subscriber delivery
//! - [`ingest`]: Polling, streaming, and heartbeat producers
//! - [`transport`]: WebSocket and SSE connection handlers
//! - [`api`]: HTTP server with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::hub::{Hub, HubConfig};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::new(HubConfig::default());
//!
//!     let mut subscription = hub.subscribe()?;
//!     let report = hub.broadcast(Bytes::from_static(b"{\"red\":1}"));
//!     println!("Delivered to {} subscribers", report.delivered);
//!
//!     if let Some(payload) = subscription.recv().await {
//!         println!("Received {} bytes", payload.len());
//!     }
//!
//!     hub.shutdown();
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod hub;
pub mod ingest;
pub mod transport;

// Re-export top-level types for convenience
pub use hub::{
    BroadcastReport, DeliveryError, Hub, HubConfig, HubError, HubStats, PayloadSink,
    SubscriberHandle, SubscriberId, SubscriberState, Subscription,
};

pub use ingest::{
    HeartbeatIngestor, IngestError, IngestHandle, IngestScheduler, Ingestor, PollingIngestor,
    ShutdownReport, StreamingIngestor,
};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError, DefaultLoad, LoggingConfig};

pub use transport::ServerMessage;
