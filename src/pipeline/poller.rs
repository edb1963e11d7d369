//! Poll loop — fetches unseen mail on a fixed interval and runs each
//! message through the `TriagePipeline`.
//!
//! Owns the `TriageState` for its whole lifetime. Mailbox errors are logged
//! and retried after a short backoff; the metrics snapshot is flushed every
//! few messages and once more on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::Mailbox;
use crate::error::MailboxError;
use crate::pipeline::metrics::MetricsFile;
use crate::pipeline::processor::TriagePipeline;
use crate::pipeline::state::TriageState;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Wait after a failed fetch before trying again.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(10);

pub const DEFAULT_METRICS_FLUSH_EVERY: u64 = 10;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub error_backoff: Duration,
    /// Flush the snapshot after this many processed messages. 0 disables
    /// periodic flushing; shutdown still flushes.
    pub flush_every: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            error_backoff: ERROR_BACKOFF,
            flush_every: DEFAULT_METRICS_FLUSH_EVERY,
        }
    }
}

pub struct Poller {
    mailbox: Arc<dyn Mailbox>,
    pipeline: Arc<TriagePipeline>,
    metrics_file: MetricsFile,
    config: PollerConfig,
}

impl Poller {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        pipeline: Arc<TriagePipeline>,
        metrics_file: MetricsFile,
        config: PollerConfig,
    ) -> Self {
        Self {
            mailbox,
            pipeline,
            metrics_file,
            config,
        }
    }

    /// One fetch + process cycle. Returns the number of fetched messages.
    pub async fn poll_once(&self, state: &mut TriageState) -> Result<usize, MailboxError> {
        let messages = self.mailbox.fetch_unseen().await?;
        if messages.is_empty() {
            debug!(mailbox = self.mailbox.name(), "No unseen messages");
            return Ok(0);
        }

        info!(count = messages.len(), "Processing unseen messages");
        for raw in &messages {
            let outcome = self.pipeline.process(raw, state).await;
            debug!(seq = raw.seq, ?outcome, "Message done");

            let total = state.metrics.total_processed;
            if outcome.is_processed()
                && self.config.flush_every > 0
                && total % self.config.flush_every == 0
            {
                self.flush(state);
            }
        }
        Ok(messages.len())
    }

    /// Write the metrics snapshot. Failures are logged, never fatal.
    pub fn flush(&self, state: &TriageState) {
        match self.metrics_file.save(&state.snapshot()) {
            Ok(()) => state.metrics.log_stats(),
            Err(e) => warn!(
                path = %self.metrics_file.path().display(),
                error = %e,
                "Failed to write metrics snapshot"
            ),
        }
    }

    /// Poll until `shutdown` turns true (or its sender is dropped), then
    /// flush and hand back the final state.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> TriageState {
        let mut state = TriageState::new();
        info!(
            mailbox = self.mailbox.name(),
            interval_secs = self.config.interval.as_secs(),
            "Poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.poll_once(&mut state).await {
                Ok(_) => self.config.interval,
                Err(e) => {
                    error!(error = %e, "Mail poll failed");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Poller shutting down");
        self.flush(&state);
        state
    }
}

/// Spawn the poll loop. Send `true` on the returned sender to stop it; the
/// handle resolves to the final state after the shutdown flush.
pub fn spawn_poller(poller: Poller) -> (JoinHandle<TriageState>, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(rx));
    (handle, tx)
}
