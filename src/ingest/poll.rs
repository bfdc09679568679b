//! Polling Ingestor
//!
//! Asks a request/response upstream for its current state on a fixed period
//! and relays each successful answer verbatim.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{IngestError, Ingestor};
use crate::hub::Hub;

/// Upstream that answers "current state" on demand
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, IngestError>;
}

/// `GET`s a URL and returns the response body
pub struct HttpPollSource {
    client: Client,
    url: String,
}

impl HttpPollSource {
    /// Create a source whose requests are bounded by `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PollSource for HttpPollSource {
    async fn fetch(&self) -> Result<Bytes, IngestError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(IngestError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(IngestError::from_response(response).await);
        }

        response.bytes().await.map_err(IngestError::from_reqwest)
    }
}

/// Periodically polls a [`PollSource`] and broadcasts the result
pub struct PollingIngestor {
    source: Arc<dyn PollSource>,
    interval: Duration,
    timeout: Duration,
    skip_unchanged: bool,
}

impl PollingIngestor {
    pub fn new(source: Arc<dyn PollSource>, interval: Duration, timeout: Duration) -> Self {
        Self {
            source,
            interval,
            timeout,
            skip_unchanged: false,
        }
    }

    /// Don't re-broadcast a payload identical to the previous poll
    pub fn skip_unchanged(mut self, skip: bool) -> Self {
        self.skip_unchanged = skip;
        self
    }

    async fn poll_once(&self) -> Result<Bytes, IngestError> {
        match tokio::time::timeout(self.timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::Timeout),
        }
    }
}

#[async_trait]
impl Ingestor for PollingIngestor {
    fn name(&self) -> &str {
        "poll"
    }

    async fn run(&self, hub: Hub, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Polling ingestor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Bytes> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_once() => result,
            };

            match result {
                Ok(payload) => {
                    if self.skip_unchanged {
                        if last.as_ref() == Some(&payload) {
                            tracing::trace!("Upstream unchanged, skipping broadcast");
                            continue;
                        }
                        last = Some(payload.clone());
                    }

                    let report = hub.broadcast(payload);
                    tracing::debug!(delivered = report.delivered, "Relayed polled payload");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream poll failed");
                }
            }
        }

        tracing::info!("Polling ingestor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Times out twice, succeeds once, then keeps failing
    struct ScriptedSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PollSource for ScriptedSource {
        async fn fetch(&self) -> Result<Bytes, IngestError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Bytes::from_static(b"too late"))
                }
                2 => Ok(Bytes::from_static(b"{\"red\":3}")),
                _ => Err(IngestError::Unavailable),
            }
        }
    }

    struct FixedSource;

    #[async_trait]
    impl PollSource for FixedSource {
        async fn fetch(&self) -> Result<Bytes, IngestError> {
            Ok(Bytes::from_static(b"same"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_then_success_broadcasts_once() {
        let hub = Hub::new(HubConfig::default());
        let mut subscription = hub.subscribe().unwrap();
        let source = Arc::new(ScriptedSource {
            calls: AtomicUsize::new(0),
        });

        let ingestor = PollingIngestor::new(
            source.clone(),
            Duration::from_millis(100),
            Duration::from_millis(50),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let hub = hub.clone();
            let cancel = cancel.clone();
            async move { ingestor.run(hub, cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(source.calls.load(Ordering::SeqCst) > 3);
        assert_eq!(subscription.try_recv(), Some(Bytes::from_static(b"{\"red\":3}")));
        assert_eq!(subscription.try_recv(), None);
        assert_eq!(hub.stats().total_broadcasts, 1);
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_unchanged() {
        let hub = Hub::new(HubConfig::default());
        let mut subscription = hub.subscribe().unwrap();

        let ingestor = PollingIngestor::new(
            Arc::new(FixedSource),
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
        .skip_unchanged(true);
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let hub = hub.clone();
            let cancel = cancel.clone();
            async move { ingestor.run(hub, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(550)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(subscription.try_recv(), Some(Bytes::from_static(b"same")));
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn test_http_source_unreachable() {
        // Port 9 (discard) is not expected to accept HTTP connections
        let source = HttpPollSource::new("http://127.0.0.1:9/state", Duration::from_millis(500))
            .unwrap();
        assert!(source.fetch().await.is_err());
        assert_eq!(source.url(), "http://127.0.0.1:9/state");
    }
}
