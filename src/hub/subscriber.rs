//! Subscriber Slots
//!
//! A slot is the hub-side half of one subscriber: the sending end of its
//! bounded queue plus its lifecycle. The transport-side half is either a
//! [`Subscription`] (caller drains the queue) or a [`SubscriberHandle`]
//! (a delivery worker drains it into a sink).

use bytes::Bytes;
use futures_util::Stream;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::broker::Hub;
use super::delivery::{spawn_worker, PayloadSink};

/// Unique identifier for a subscriber, never reused within one hub
pub type SubscriberId = u64;

/// Lifecycle of a subscriber. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Registered and eligible for delivery
    Active,
    /// Removal has started (write failed, evicted or explicitly removed)
    Closing,
    /// Erased from the subscriber set, queue closed
    Removed,
}

const ACTIVE: u8 = 0;
const CLOSING: u8 = 1;
const REMOVED: u8 = 2;

/// State shared between a slot and whoever drives its transport
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    closed: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(ACTIVE),
            closed: CancellationToken::new(),
        })
    }

    pub(crate) fn state(&self) -> SubscriberState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => SubscriberState::Active,
            CLOSING => SubscriberState::Closing,
            _ => SubscriberState::Removed,
        }
    }

    /// Active -> Closing. No effect once closing has started.
    pub(crate) fn begin_close(&self) {
        let _ = self
            .state
            .compare_exchange(ACTIVE, CLOSING, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Marks the subscriber removed and fires its close signal.
    pub(crate) fn finish_close(&self) {
        self.state.store(REMOVED, Ordering::Release);
        self.closed.cancel();
    }

    pub(crate) fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Outcome of offering a payload to a slot
pub(crate) enum Offer {
    Enqueued,
    Full,
    Closed,
}

/// Hub-side entry in the subscriber set
pub(crate) struct SubscriberSlot {
    sender: mpsc::Sender<Bytes>,
    lifecycle: Arc<Lifecycle>,
}

impl SubscriberSlot {
    pub(crate) fn new(sender: mpsc::Sender<Bytes>, lifecycle: Arc<Lifecycle>) -> Self {
        Self { sender, lifecycle }
    }

    /// Non-blocking enqueue
    pub(crate) fn offer(&self, payload: Bytes) -> Offer {
        match self.sender.try_send(payload) {
            Ok(()) => Offer::Enqueued,
            Err(TrySendError::Full(_)) => Offer::Full,
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    pub(crate) fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }
}

/// Receiving side of one subscriber's queue.
///
/// Dropping a subscription unregisters it from the hub.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Bytes>,
    lifecycle: Arc<Lifecycle>,
    hub: Hub,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        receiver: mpsc::Receiver<Bytes>,
        lifecycle: Arc<Lifecycle>,
        hub: Hub,
    ) -> Self {
        Self {
            id,
            receiver,
            lifecycle,
            hub,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn state(&self) -> SubscriberState {
        self.lifecycle.state()
    }

    /// Token that fires once this subscriber has been removed from the hub
    pub fn close_signal(&self) -> CancellationToken {
        self.lifecycle.close_signal()
    }

    pub(crate) fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Wait for the next payload.
    ///
    /// Returns `None` once the subscriber has been removed. Payloads still
    /// queued at that point are discarded.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            _ = self.lifecycle.closed.cancelled() => None,
            payload = self.receiver.recv() => payload,
        }
    }

    /// Take the next queued payload without waiting
    pub fn try_recv(&mut self) -> Option<Bytes> {
        if self.lifecycle.closed.is_cancelled() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Hand the queue to a dedicated delivery worker writing into `sink`
    pub fn forward_to<S: PayloadSink>(self, sink: S) -> SubscriberHandle {
        spawn_worker(self, sink)
    }

    /// Turn the subscription into a stream of payloads.
    ///
    /// The stream ends when the subscriber is removed; dropping it unregisters.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|payload| (payload, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle to a subscriber served by a delivery worker
#[derive(Debug)]
pub struct SubscriberHandle {
    id: SubscriberId,
    lifecycle: Arc<Lifecycle>,
    worker: JoinHandle<()>,
}

impl SubscriberHandle {
    pub(crate) fn new(id: SubscriberId, lifecycle: Arc<Lifecycle>, worker: JoinHandle<()>) -> Self {
        Self {
            id,
            lifecycle,
            worker,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn state(&self) -> SubscriberState {
        self.lifecycle.state()
    }

    pub fn close_signal(&self) -> CancellationToken {
        self.lifecycle.close_signal()
    }

    /// Wait for the delivery worker to exit
    pub async fn finished(self) {
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_moves_forward_only() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), SubscriberState::Active);

        lifecycle.begin_close();
        assert_eq!(lifecycle.state(), SubscriberState::Closing);

        lifecycle.finish_close();
        assert_eq!(lifecycle.state(), SubscriberState::Removed);
        assert!(lifecycle.close_signal().is_cancelled());

        // Closing again must not resurrect an earlier state
        lifecycle.begin_close();
        assert_eq!(lifecycle.state(), SubscriberState::Removed);
    }

    #[test]
    fn test_slot_offer_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let slot = SubscriberSlot::new(tx, Lifecycle::new());

        assert!(matches!(slot.offer(Bytes::from_static(b"a")), Offer::Enqueued));
        assert!(matches!(slot.offer(Bytes::from_static(b"b")), Offer::Full));

        drop(rx);
        assert!(matches!(slot.offer(Bytes::from_static(b"c")), Offer::Closed));
    }
}
