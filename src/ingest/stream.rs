//! Streaming Ingestor
//!
//! Continuously reads records from a streaming upstream and relays each one
//! verbatim. Read errors are logged and the read is retried after a delay;
//! the loop itself never gives up.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{IngestError, Ingestor};
use crate::hub::Hub;

/// Upstream yielding a sequence of opaque records.
///
/// Implementations must be cancel-safe: a `next_record` future dropped before
/// completion must not lose a record that was not yet returned.
#[async_trait]
pub trait RecordSource: Send {
    async fn next_record(&mut self) -> Result<Bytes, IngestError>;
}

/// Default cap on a single record, in bytes
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

type PendingConnect =
    BoxFuture<'static, Result<reqwest::Result<reqwest::Response>, tokio::time::error::Elapsed>>;

/// Reads newline-delimited records from a long-lived HTTP response.
///
/// Tracks how many records have been consumed. When `cursor_param` is set,
/// reconnects resume from that position (`?<cursor_param>=<cursor>`).
///
/// A connection attempt in flight is kept across dropped `next_record`
/// calls, so a caller polling with a short wait never restarts it.
pub struct HttpLineSource {
    client: Client,
    url: String,
    cursor_param: Option<String>,
    cursor: u64,
    connect_timeout: Duration,
    max_record_bytes: usize,
    connecting: Option<PendingConnect>,
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    buffer: Vec<u8>,
}

impl HttpLineSource {
    /// `connect_timeout` bounds everything up to the response headers
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        cursor_param: Option<String>,
    ) -> Result<Self, IngestError> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            cursor_param,
            cursor: 0,
            connect_timeout,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            connecting: None,
            body: None,
            buffer: Vec::new(),
        })
    }

    /// Longest record accepted before the connection is dropped
    pub fn max_record_bytes(mut self, limit: usize) -> Self {
        self.max_record_bytes = limit.max(1);
        self
    }

    /// Number of records consumed so far
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    async fn connect(
        &mut self,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, IngestError> {
        let client = &self.client;
        let url = &self.url;
        let cursor_param = &self.cursor_param;
        let cursor = self.cursor;
        let connect_timeout = self.connect_timeout;
        let pending = self.connecting.get_or_insert_with(|| -> PendingConnect {
            let mut request = client.get(url);
            if let Some(param) = cursor_param {
                request = request.query(&[(param.as_str(), cursor)]);
            }
            Box::pin(tokio::time::timeout(connect_timeout, request.send()))
        });

        let outcome = pending.await;
        self.connecting = None;

        let response = match outcome {
            Ok(result) => result.map_err(IngestError::from_reqwest)?,
            Err(_) => return Err(IngestError::Timeout),
        };
        if !response.status().is_success() {
            return Err(IngestError::from_response(response).await);
        }

        tracing::info!(url = %self.url, cursor = self.cursor, "Connected to upstream stream");
        Ok(response.bytes_stream().boxed())
    }

    /// Drop the connection. A partial record is discarded and re-read on reconnect.
    fn reset(&mut self) {
        self.connecting = None;
        self.body = None;
        self.buffer.clear();
    }
}

#[async_trait]
impl RecordSource for HttpLineSource {
    async fn next_record(&mut self) -> Result<Bytes, IngestError> {
        loop {
            if let Some(record) = split_record(&mut self.buffer) {
                self.cursor += 1;
                return Ok(record);
            }

            if self.buffer.len() > self.max_record_bytes {
                let limit = self.max_record_bytes;
                self.reset();
                return Err(IngestError::RecordTooLarge { limit });
            }

            let chunk = match self.body.as_mut() {
                Some(body) => body.next().await,
                None => {
                    self.body = Some(self.connect().await?);
                    continue;
                }
            };

            match chunk {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    self.reset();
                    return Err(IngestError::from_reqwest(e));
                }
                None => {
                    self.reset();
                    return Err(IngestError::Closed);
                }
            }
        }
    }
}

/// Pop the next complete, non-empty line from `buffer`
fn split_record(buffer: &mut Vec<u8>) -> Option<Bytes> {
    while let Some(end) = buffer.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if !line.is_empty() {
            return Some(Bytes::from(line));
        }
    }
    None
}

/// Adapts an in-process channel as a record source
pub struct ChannelSource {
    receiver: mpsc::Receiver<Bytes>,
}

impl ChannelSource {
    pub fn new(receiver: mpsc::Receiver<Bytes>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn next_record(&mut self) -> Result<Bytes, IngestError> {
        self.receiver.recv().await.ok_or(IngestError::Closed)
    }
}

/// Relays records from a [`RecordSource`]
pub struct StreamingIngestor {
    source: Mutex<Box<dyn RecordSource>>,
    read_wait: Duration,
    retry_delay: Duration,
}

impl StreamingIngestor {
    pub fn new(source: Box<dyn RecordSource>, read_wait: Duration, retry_delay: Duration) -> Self {
        Self {
            source: Mutex::new(source),
            read_wait,
            retry_delay,
        }
    }
}

#[async_trait]
impl Ingestor for StreamingIngestor {
    fn name(&self) -> &str {
        "stream"
    }

    async fn run(&self, hub: Hub, cancel: CancellationToken) {
        tracing::info!(
            read_wait_ms = self.read_wait.as_millis() as u64,
            "Streaming ingestor started"
        );

        let mut source = self.source.lock().await;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = tokio::time::timeout(self.read_wait, source.next_record()) => next,
            };

            match next {
                // Nothing arrived within the wait window
                Err(_) => continue,
                Ok(Ok(record)) => {
                    let report = hub.broadcast(record);
                    tracing::trace!(delivered = report.delivered, "Relayed streamed record");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Upstream read failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        tracing::info!("Streaming ingestor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `body` after `delay` on every connection, counting accepts
    async fn slow_upstream(delay: Duration, body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/updates", listener.local_addr().unwrap());
        let accepts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepts);
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = [0u8; 1024];
                    let _ = socket.read(&mut request).await;
                    tokio::time::sleep(delay).await;
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nContent-Length: {}\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(body).await;
                    // Hold the connection open so end-of-body comes from the length
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });

        (url, accepts)
    }

    /// Replays a fixed script of read results, then idles
    struct ScriptedSource {
        script: VecDeque<Result<Bytes, IngestError>>,
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn next_record(&mut self) -> Result<Bytes, IngestError> {
            match self.script.pop_front() {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    #[test]
    fn test_split_record() {
        let mut buffer = b"{\"a\":1}\r\n\n{\"b\":2}\n{\"c\"".to_vec();

        assert_eq!(split_record(&mut buffer), Some(Bytes::from_static(b"{\"a\":1}")));
        assert_eq!(split_record(&mut buffer), Some(Bytes::from_static(b"{\"b\":2}")));
        assert_eq!(split_record(&mut buffer), None);
        assert_eq!(buffer, b"{\"c\"".to_vec());

        buffer.extend_from_slice(b":3}\n");
        assert_eq!(split_record(&mut buffer), Some(Bytes::from_static(b"{\"c\":3}")));
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_are_retried() {
        let hub = Hub::new(HubConfig::default());
        let mut subscription = hub.subscribe().unwrap();

        let source = ScriptedSource {
            script: VecDeque::from(vec![
                Ok(Bytes::from_static(b"one")),
                Err(IngestError::Closed),
                Err(IngestError::Unavailable),
                Ok(Bytes::from_static(b"two")),
            ]),
        };
        let ingestor = StreamingIngestor::new(
            Box::new(source),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let hub = hub.clone();
            let cancel = cancel.clone();
            async move { ingestor.run(hub, cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());

        assert_eq!(subscription.try_recv(), Some(Bytes::from_static(b"one")));
        assert_eq!(subscription.try_recv(), Some(Bytes::from_static(b"two")));
        assert_eq!(subscription.try_recv(), None);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_source_relays_verbatim() {
        let hub = Hub::new(HubConfig::default());
        let mut subscription = hub.subscribe().unwrap();
        let (tx, rx) = mpsc::channel(4);

        let ingestor = StreamingIngestor::new(
            Box::new(ChannelSource::new(rx)),
            Duration::from_millis(50),
            Duration::from_millis(10),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let hub = hub.clone();
            let cancel = cancel.clone();
            async move { ingestor.run(hub, cancel).await }
        });

        tx.send(Bytes::from_static(b"\x00binary\xff")).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(Bytes::from_static(b"\x00binary\xff")));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_slow_headers_connect_once() {
        let (url, accepts) = slow_upstream(Duration::from_millis(600), b"hello\n").await;
        let hub = Hub::new(HubConfig::default());
        let mut subscription = hub.subscribe().unwrap();

        let source = HttpLineSource::new(&url, Duration::from_secs(5), None).unwrap();
        let ingestor = StreamingIngestor::new(
            Box::new(source),
            Duration::from_millis(200),
            Duration::from_secs(5),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let hub = hub.clone();
            let cancel = cancel.clone();
            async move { ingestor.run(hub, cancel).await }
        });

        let received = tokio::time::timeout(Duration::from_secs(3), subscription.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(Bytes::from_static(b"hello")));
        assert_eq!(accepts.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_timeout_is_an_error() {
        let (url, _accepts) = slow_upstream(Duration::from_secs(10), b"late\n").await;
        let mut source = HttpLineSource::new(&url, Duration::from_millis(100), None).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), source.next_record())
            .await
            .unwrap();
        assert!(matches!(result, Err(IngestError::Timeout)));
    }

    #[tokio::test]
    async fn test_oversized_record_resets_connection() {
        let (url, _accepts) =
            slow_upstream(Duration::ZERO, b"0123456789abcdef0123456789abcdef").await;
        let mut source = HttpLineSource::new(&url, Duration::from_secs(2), None)
            .unwrap()
            .max_record_bytes(16);

        let result = tokio::time::timeout(Duration::from_secs(2), source.next_record())
            .await
            .unwrap();
        assert!(matches!(result, Err(IngestError::RecordTooLarge { limit: 16 })));
        assert_eq!(source.cursor(), 0);
    }
}
