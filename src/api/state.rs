//! Application State
//!
//! Shared state accessible by all handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::hub::Hub;
use crate::ingest::PollSource;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Hub every connection subscribes to
    pub hub: Hub,
    /// Service configuration
    pub config: Arc<Config>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// Wall-clock start time reported by health checks
    pub started_at: DateTime<Utc>,
    /// Upstream queried for the state sent to new subscribers
    snapshot_source: Option<Arc<dyn PollSource>>,
    snapshot_timeout: Duration,
}

impl AppState {
    pub fn new(hub: Hub, config: Config) -> Self {
        let snapshot_timeout = config.poll.snapshot_timeout();
        Self {
            hub,
            config: Arc::new(config),
            start_time: Instant::now(),
            started_at: Utc::now(),
            snapshot_source: None,
            snapshot_timeout,
        }
    }

    /// Send the source's current state to every new subscriber
    pub fn with_snapshot(mut self, source: Arc<dyn PollSource>) -> Self {
        self.snapshot_source = Some(source);
        self
    }

    /// Fetch the snapshot for a new subscriber, if one is configured.
    ///
    /// Failures are logged and yield `None`; the subscriber still receives
    /// live broadcasts.
    pub async fn snapshot(&self) -> Option<Bytes> {
        let source = self.snapshot_source.as_ref()?;

        match tokio::time::timeout(self.snapshot_timeout, source.fetch()).await {
            Ok(Ok(payload)) => Some(payload),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Snapshot fetch failed");
                None
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.snapshot_timeout, "Snapshot fetch timed out");
                None
            }
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use crate::ingest::IngestError;
    use async_trait::async_trait;

    struct Fixed(&'static [u8]);

    #[async_trait]
    impl PollSource for Fixed {
        async fn fetch(&self) -> Result<Bytes, IngestError> {
            Ok(Bytes::from_static(self.0))
        }
    }

    struct Down;

    #[async_trait]
    impl PollSource for Down {
        async fn fetch(&self) -> Result<Bytes, IngestError> {
            Err(IngestError::Unavailable)
        }
    }

    struct Slow;

    #[async_trait]
    impl PollSource for Slow {
        async fn fetch(&self) -> Result<Bytes, IngestError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Bytes::from_static(b"stale"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_bounded_by_its_own_timeout() {
        let config = Config::default();
        assert!(config.poll.snapshot_timeout() < config.poll.timeout());

        let hub = Hub::new(HubConfig::default());
        let mut subscription = hub.subscribe().unwrap();
        let state = AppState::new(hub.clone(), config).with_snapshot(Arc::new(Slow));

        let started = tokio::time::Instant::now();
        assert!(state.snapshot().await.is_none());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(500));
        assert!(waited < Duration::from_secs(1));

        hub.broadcast(Bytes::from_static(b"a"));
        hub.broadcast(Bytes::from_static(b"b"));
        assert!(hub.contains(subscription.id()));
        assert_eq!(subscription.try_recv(), Some(Bytes::from_static(b"a")));
    }

    #[tokio::test]
    async fn test_snapshot_absent_without_source() {
        let state = AppState::new(Hub::new(HubConfig::default()), Config::default());
        assert!(state.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_from_source() {
        let state = AppState::new(Hub::new(HubConfig::default()), Config::default())
            .with_snapshot(Arc::new(Fixed(b"{\"red\":3}")));
        assert_eq!(
            state.snapshot().await,
            Some(Bytes::from_static(b"{\"red\":3}"))
        );
    }

    #[tokio::test]
    async fn test_snapshot_failure_is_none() {
        let state = AppState::new(Hub::new(HubConfig::default()), Config::default())
            .with_snapshot(Arc::new(Down));
        assert!(state.snapshot().await.is_none());
    }
}
