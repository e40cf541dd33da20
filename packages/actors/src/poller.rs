//! Top-level receive loop feeding the dispatcher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use queue::{QueueError, QueueService};

use crate::dispatcher::{DispatchError, Dispatcher};

/// Poller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Maximum notifications requested per receive.
    pub batch_size: usize,
    /// First retry delay after a failed receive.
    pub min_backoff: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Receives batches from the queue and submits each notification to the
/// dispatcher without waiting for its job.
pub struct Poller {
    queue: Arc<dyn QueueService>,
    dispatcher: Dispatcher,
    config: PollerConfig,
}

impl Poller {
    pub fn new(queue: Arc<dyn QueueService>, dispatcher: Dispatcher, config: PollerConfig) -> Self {
        Self {
            queue,
            dispatcher,
            config,
        }
    }

    fn retry_policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.config.min_backoff)
            .with_max_delay(self.config.max_backoff)
            .with_jitter()
            .without_max_times()
    }

    /// Receive one batch and submit it. Returns the number of notifications.
    ///
    /// Receive failures are retried with backoff until the queue answers;
    /// the only error is a closed dispatcher.
    pub async fn poll_once(&self) -> Result<usize, DispatchError> {
        let batch = match (|| self.queue.receive_batch(self.config.batch_size))
            .retry(self.retry_policy())
            .notify(|err: &QueueError, dur: Duration| {
                tracing::warn!(
                    error = %err,
                    "Failed to receive notifications. Retrying in {:.1}s",
                    dur.as_secs_f32()
                );
            })
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(error = %err, "Giving up on this receive");
                return Ok(0);
            }
        };

        let count = batch.len();
        if count > 0 {
            tracing::debug!("Received {} notifications", count);
        }
        for notification in batch {
            self.dispatcher.submit(notification).await?;
        }
        Ok(count)
    }

    /// Poll until `shutdown` resolves.
    ///
    /// A batch interrupted by shutdown is not lost: notifications that were
    /// not submitted become visible again on the queue.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), DispatchError> {
        tracing::info!(batch_size = self.config.batch_size, "Poller started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Poller stopping");
                    return Ok(());
                }
                result = self.poll_once() => {
                    result?;
                }
            }
        }
    }
}
