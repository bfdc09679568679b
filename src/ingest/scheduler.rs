//! Ingest Scheduler
//!
//! Starts every ingestor in its own task under one shared cancellation token
//! and stops them with a bounded wait.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    HeartbeatIngestor, HttpLineSource, HttpPollSource, IngestError, Ingestor, PollingIngestor,
    StreamingIngestor,
};
use crate::config::Config;
use crate::hub::Hub;

/// Collects ingestors before they are started
#[derive(Default)]
pub struct IngestScheduler {
    ingestors: Vec<Arc<dyn Ingestor>>,
}

/// Running ingestors
pub struct IngestHandle {
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

/// Outcome of stopping the ingestors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Loops that exited within the grace period
    pub stopped: usize,
    /// Loops that had to be aborted
    pub aborted: usize,
}

impl IngestScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the ingestors enabled in `config`
    pub fn from_config(config: &Config) -> Result<Self, IngestError> {
        let mut scheduler = Self::new();

        if config.poll.enabled {
            let source = HttpPollSource::new(&config.poll.url, config.poll.timeout())?;
            scheduler.add(
                PollingIngestor::new(Arc::new(source), config.poll.interval(), config.poll.timeout())
                    .skip_unchanged(config.poll.skip_unchanged),
            );
        }

        if config.stream.enabled {
            let source = HttpLineSource::new(
                &config.stream.url,
                config.stream.connect_timeout(),
                config.stream.cursor_param.clone(),
            )?
            .max_record_bytes(config.stream.max_record_bytes);
            scheduler.add(StreamingIngestor::new(
                Box::new(source),
                config.stream.read_wait(),
                config.stream.retry_delay(),
            ));
        }

        if config.heartbeat.enabled {
            scheduler.add(
                HeartbeatIngestor::new(config.heartbeat.interval())
                    .skip_when_empty(config.heartbeat.skip_when_empty),
            );
        }

        Ok(scheduler)
    }

    pub fn add<I: Ingestor + 'static>(&mut self, ingestor: I) {
        self.ingestors.push(Arc::new(ingestor));
    }

    pub fn len(&self) -> usize {
        self.ingestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ingestors.is_empty()
    }

    /// Spawn every ingestor against `hub`
    pub fn start(self, hub: Hub) -> IngestHandle {
        let cancel = CancellationToken::new();

        let tasks = self
            .ingestors
            .into_iter()
            .map(|ingestor| {
                let name = ingestor.name().to_string();
                let hub = hub.clone();
                let token = cancel.child_token();

                tracing::info!(ingestor = %name, "Starting ingestor");
                let task = tokio::spawn(async move { ingestor.run(hub, token).await });
                (name, task)
            })
            .collect();

        IngestHandle { cancel, tasks }
    }
}

impl IngestHandle {
    /// Number of running ingestor tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every loop and wait up to `grace` for them to exit
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for (name, mut task) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(_) => report.stopped += 1,
                Err(_) => {
                    tracing::warn!(ingestor = %name, "Ingestor did not stop in time, aborting");
                    task.abort();
                    report.aborted += 1;
                }
            }
        }

        tracing::info!(
            stopped = report.stopped,
            aborted = report.aborted,
            "Ingestors shut down"
        );
        report
    }
}
