//! Delivery Workers
//!
//! Each subscriber served through a sink gets exactly one writer task. The
//! broadcaster only enqueues; the worker is the single reader of the queue
//! and the only code that touches the transport.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use super::subscriber::{SubscriberHandle, Subscription};

/// Write side of a subscriber's transport
#[async_trait]
pub trait PayloadSink: Send + 'static {
    /// Push one payload to the remote peer
    async fn deliver(&mut self, payload: Bytes) -> Result<(), DeliveryError>;

    /// Release the transport once delivery has stopped
    async fn close(&mut self) {}
}

/// In-process sink, useful for bridging the hub into another task
#[async_trait]
impl PayloadSink for mpsc::Sender<Bytes> {
    async fn deliver(&mut self, payload: Bytes) -> Result<(), DeliveryError> {
        self.send(payload).await.map_err(|_| DeliveryError::Closed)
    }
}

/// Errors raised by a sink write
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Transport closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}

pub(crate) fn spawn_worker<S: PayloadSink>(
    mut subscription: Subscription,
    mut sink: S,
) -> SubscriberHandle {
    let id = subscription.id();
    let lifecycle = subscription.lifecycle();
    let close = subscription.close_signal();

    let worker = tokio::spawn(async move {
        while let Some(payload) = subscription.recv().await {
            // A stuck write is abandoned as soon as the subscriber is evicted
            let result = tokio::select! {
                biased;
                _ = close.cancelled() => break,
                result = sink.deliver(payload) => result,
            };

            if let Err(e) = result {
                tracing::debug!(
                    subscriber_id = id,
                    error = %e,
                    "Delivery failed, closing subscriber"
                );
                break;
            }
        }

        drop(subscription);
        sink.close().await;
        tracing::debug!(subscriber_id = id, "Delivery worker stopped");
    });

    SubscriberHandle::new(id, lifecycle, worker)
}
