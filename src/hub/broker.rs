//! Hub (Broker)
//!
//! Owns the subscriber set and fans payloads out to it. Every mutation of the
//! set (add, remove, iterate-to-broadcast) happens under one exclusive lock
//! that is never held across an `.await` or a transport write.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

use super::delivery::PayloadSink;
use super::subscriber::{
    Lifecycle, Offer, SubscriberHandle, SubscriberId, SubscriberSlot, Subscription,
};

/// Configuration for the hub
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum number of concurrent subscribers (0 = unlimited)
    #[serde(default)]
    pub max_subscribers: usize,
}

fn default_queue_capacity() -> usize {
    8
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_subscribers: 0,
        }
    }
}

/// Cloneable handle to one hub instance.
///
/// Construct it once at service start and pass clones to every ingestor and
/// connection handler.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    subscribers: Mutex<SubscriberSet>,
    next_id: AtomicU64,
    config: HubConfig,
    counters: Counters,
}

struct SubscriberSet {
    slots: HashMap<SubscriberId, SubscriberSlot>,
    accepting: bool,
}

#[derive(Default)]
struct Counters {
    registered: AtomicU64,
    evicted: AtomicU64,
    broadcasts: AtomicU64,
    enqueued: AtomicU64,
}

/// Result of a single broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Subscribers the payload was enqueued for
    pub delivered: usize,
    /// Subscribers evicted during this broadcast
    pub evicted: usize,
}

/// Point-in-time hub statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub total_registered: u64,
    pub total_evicted: u64,
    pub total_broadcasts: u64,
    pub total_enqueued: u64,
}

impl Hub {
    /// Create a new hub
    pub fn new(config: HubConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(SubscriberSet {
                    slots: HashMap::new(),
                    accepting: true,
                }),
                next_id: AtomicU64::new(1),
                config,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberSet> {
        // Critical sections never panic midway, so a poisoned set is still consistent
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber with an empty bounded queue.
    ///
    /// Subsequent broadcasts are visible to the returned subscription. Fails
    /// without touching the subscriber set when the hub is shutting down or
    /// the subscriber limit has been reached.
    pub fn subscribe(&self) -> Result<Subscription, HubError> {
        let (sender, receiver) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        let lifecycle = Lifecycle::new();

        let id = {
            let mut set = self.lock();
            if !set.accepting {
                return Err(HubError::ShuttingDown);
            }

            let limit = self.inner.config.max_subscribers;
            if limit > 0 && set.slots.len() >= limit {
                return Err(HubError::TooManySubscribers { limit });
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            set.slots
                .insert(id, SubscriberSlot::new(sender, Arc::clone(&lifecycle)));
            id
        };

        self.inner.counters.registered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(subscriber_id = id, "Subscriber registered");

        Ok(Subscription::new(id, receiver, lifecycle, self.clone()))
    }

    /// Register a transport sink served by its own delivery worker
    pub fn register<S: PayloadSink>(&self, sink: S) -> Result<SubscriberHandle, HubError> {
        Ok(self.subscribe()?.forward_to(sink))
    }

    /// Remove a subscriber and fire its close signal.
    ///
    /// Idempotent: returns `true` only for the call that performed the removal.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut set = self.lock();
            let removed = set.slots.remove(&id);
            if let Some(slot) = &removed {
                slot.lifecycle().begin_close();
            }
            removed
        };

        match removed {
            Some(slot) => {
                let lifecycle = Arc::clone(slot.lifecycle());
                drop(slot);
                lifecycle.finish_close();
                tracing::info!(subscriber_id = id, "Subscriber unregistered");
                true
            }
            None => false,
        }
    }

    /// Deliver `payload` to every current subscriber.
    ///
    /// Enqueueing never blocks. A subscriber whose queue is full, or whose
    /// consumer is gone, is evicted before this call returns.
    pub fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut evicted = Vec::new();

        {
            let mut set = self.lock();
            set.slots.retain(|id, slot| match slot.offer(payload.clone()) {
                Offer::Enqueued => {
                    report.delivered += 1;
                    true
                }
                Offer::Full => {
                    slot.lifecycle().begin_close();
                    evicted.push((*id, Arc::clone(slot.lifecycle()), "queue full"));
                    false
                }
                Offer::Closed => {
                    slot.lifecycle().begin_close();
                    evicted.push((*id, Arc::clone(slot.lifecycle()), "queue closed"));
                    false
                }
            });
        }

        report.evicted = evicted.len();
        for (id, lifecycle, reason) in evicted {
            lifecycle.finish_close();
            tracing::info!(subscriber_id = id, reason, "Subscriber evicted");
        }

        let counters = &self.inner.counters;
        counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        counters
            .enqueued
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        counters
            .evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);

        tracing::trace!(
            bytes = payload.len(),
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast payload"
        );

        report
    }

    /// Stop accepting registrations and close every subscriber.
    ///
    /// Returns the number of subscribers closed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = {
            let mut set = self.lock();
            set.accepting = false;
            set.slots
                .drain()
                .map(|(id, slot)| {
                    slot.lifecycle().begin_close();
                    (id, Arc::clone(slot.lifecycle()))
                })
                .collect()
        };

        for (_, lifecycle) in &drained {
            lifecycle.finish_close();
        }

        tracing::info!(closed = drained.len(), "Hub shut down");
        drained.len()
    }

    /// Whether new registrations are accepted
    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    /// Get the current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Check whether a subscriber is currently registered
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().slots.contains_key(&id)
    }

    pub fn stats(&self) -> HubStats {
        let counters = &self.inner.counters;
        HubStats {
            subscribers: self.subscriber_count(),
            total_registered: counters.registered.load(Ordering::Relaxed),
            total_evicted: counters.evicted.load(Ordering::Relaxed),
            total_broadcasts: counters.broadcasts.load(Ordering::Relaxed),
            total_enqueued: counters.enqueued.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Errors returned when registering a subscriber
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Hub is shutting down")]
    ShuttingDown,

    #[error("Too many subscribers (limit: {limit})")]
    TooManySubscribers { limit: usize },
}
