//! Upstream Ingestors
//!
//! Independent loops that produce payloads and push them into the hub:
//! - Polling (request/response upstream on a fixed period)
//! - Streaming (newline-delimited records from a long-lived upstream)
//! - Heartbeat (subscriber count derived from the hub itself)
//!
//! Every loop absorbs its own failures. None of them exits until its
//! cancellation token fires.

mod heartbeat;
mod poll;
mod scheduler;
mod stream;

pub use heartbeat::{heartbeat_payload, HeartbeatIngestor};
pub use poll::{HttpPollSource, PollSource, PollingIngestor};
pub use scheduler::{IngestHandle, IngestScheduler, ShutdownReport};
pub use stream::{
    ChannelSource, HttpLineSource, RecordSource, StreamingIngestor, DEFAULT_MAX_RECORD_BYTES,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::hub::Hub;

/// Common trait for all ingestors
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Produce payloads into `hub` until `cancel` fires
    async fn run(&self, hub: Hub, cancel: CancellationToken);
}

/// Errors raised while reading from an upstream source
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Upstream request timed out")]
    Timeout,

    #[error("Upstream unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Upstream error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Upstream stream closed")]
    Closed,

    #[error("Record exceeds {limit} bytes")]
    RecordTooLarge { limit: usize },
}

impl IngestError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            IngestError::Timeout
        } else if e.is_connect() {
            IngestError::Unavailable
        } else {
            IngestError::Request(e)
        }
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        IngestError::Status {
            status: status.as_u16(),
            message,
        }
    }
}
