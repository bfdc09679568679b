//! Heartbeat Ingestor
//!
//! Broadcasts the current subscriber count on a fixed period. This is
//! metadata about the hub itself, not relayed upstream data.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::Ingestor;
use crate::hub::Hub;
use crate::transport::ServerMessage;

pub struct HeartbeatIngestor {
    interval: Duration,
    skip_when_empty: bool,
}

impl HeartbeatIngestor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            skip_when_empty: true,
        }
    }

    /// Whether to stay silent while nobody is connected
    pub fn skip_when_empty(mut self, skip: bool) -> Self {
        self.skip_when_empty = skip;
        self
    }
}

/// Encode the status payload for `count` subscribers
pub fn heartbeat_payload(count: usize) -> Result<Bytes, serde_json::Error> {
    ServerMessage::Users { count }.to_bytes()
}

#[async_trait]
impl Ingestor for HeartbeatIngestor {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run(&self, hub: Hub, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let count = hub.subscriber_count();
            if count == 0 && self.skip_when_empty {
                continue;
            }

            match heartbeat_payload(count) {
                Ok(payload) => {
                    hub.broadcast(payload);
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode heartbeat"),
            }
        }

        tracing::debug!("Heartbeat ingestor stopped");
    }
}
