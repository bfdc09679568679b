//! Fan-out Broadcast Hub
//!
//! Relays opaque byte payloads from upstream ingestors to every connected
//! subscriber without letting one slow or dead subscriber stall the rest.
//!
//! ## Architecture
//!
//! - **Hub**: Owns the subscriber set behind a single exclusive lock and
//!   performs non-blocking fan-out on `broadcast`
//! - **Subscription**: The receiving side of one subscriber's bounded queue
//! - **Delivery worker**: One writer task per subscriber draining its queue
//!   into a [`PayloadSink`]
//!
//! ## Backpressure
//!
//! `broadcast` only ever calls `try_send`. A subscriber whose queue is full
//! is evicted within the same call: it leaves the subscriber set and its
//! close signal fires, which tears down its transport.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use relay::hub::{Hub, HubConfig};
//!
//! # async fn demo() -> Result<(), relay::hub::HubError> {
//! let hub = Hub::new(HubConfig::default());
//! let mut subscription = hub.subscribe()?;
//!
//! hub.broadcast(Bytes::from_static(b"{\"red\":1}"));
//! assert_eq!(subscription.recv().await, Some(Bytes::from_static(b"{\"red\":1}")));
//! # Ok(())
//! # }
//! ```

mod broker;
mod delivery;
mod subscriber;

pub use broker::{BroadcastReport, Hub, HubConfig, HubError, HubStats};
pub use delivery::{DeliveryError, PayloadSink};
pub use subscriber::{SubscriberHandle, SubscriberId, SubscriberState, Subscription};
