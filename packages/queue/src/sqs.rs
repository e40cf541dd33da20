//! AWS SQS queue backend.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use ingest_core::{Notification, ReceiptHandle};

use crate::{QueueError, QueueService};

/// SQS never returns more than this many messages per receive.
const MAX_RECEIVE: usize = 10;

/// Longest long-poll wait SQS accepts.
const MAX_WAIT_SECS: u64 = 20;

/// Longest visibility timeout SQS accepts (12 hours).
const MAX_VISIBILITY_SECS: u64 = 43_200;

/// Whole seconds of `duration`, capped at `max`, as the SDK's `i32`.
fn capped_secs(duration: Duration, max: u64) -> i32 {
    i32::try_from(duration.as_secs().min(max)).unwrap_or(i32::MAX)
}

/// SQS queue settings.
#[derive(Debug, Clone)]
pub struct SqsQueueConfig {
    pub queue_url: String,
    /// Long-poll wait per receive (SQS caps this at 20 seconds).
    pub wait_time: Duration,
    /// Visibility timeout override per receive; the queue default applies
    /// when unset.
    pub visibility_timeout: Option<Duration>,
}

impl SqsQueueConfig {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            wait_time: Duration::from_secs(20),
            visibility_timeout: None,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }
}

/// SQS-backed queue. The SDK client is cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: Client,
    config: SqsQueueConfig,
}

impl SqsQueue {
    pub fn new(client: Client, config: SqsQueueConfig) -> Self {
        Self { client, config }
    }

    /// Build a client from the ambient AWS environment (region, credentials).
    pub async fn connect(config: SqsQueueConfig) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        tracing::info!(queue_url = %config.queue_url, "Connected SQS client");
        Self::new(Client::new(&sdk_config), config)
    }
}

impl QueueService for SqsQueue {
    fn receive_batch(&self, max: usize) -> BoxFuture<'_, Result<Vec<Notification>, QueueError>> {
        async move {
            let max = max.clamp(1, MAX_RECEIVE) as i32;
            let wait = capped_secs(self.config.wait_time, MAX_WAIT_SECS);

            let mut request = self
                .client
                .receive_message()
                .queue_url(&self.config.queue_url)
                .max_number_of_messages(max)
                .wait_time_seconds(wait);
            if let Some(timeout) = self.config.visibility_timeout {
                request = request.visibility_timeout(capped_secs(timeout, MAX_VISIBILITY_SECS));
            }

            let output = request
                .send()
                .await
                .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

            let notifications = output
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|message| {
                    let message_id = message.message_id.unwrap_or_default();
                    let Some(receipt) = message.receipt_handle else {
                        tracing::warn!(%message_id, "Skipping message without receipt handle");
                        return None;
                    };
                    Some(Notification::new(
                        message_id,
                        ReceiptHandle::new(receipt),
                        message.body.unwrap_or_default(),
                    ))
                })
                .collect();

            Ok(notifications)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, receipt: &'a ReceiptHandle) -> BoxFuture<'a, Result<(), QueueError>> {
        async move {
            self.client
                .delete_message()
                .queue_url(&self.config.queue_url)
                .receipt_handle(receipt.as_str())
                .send()
                .await
                .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;
            Ok(())
        }
        .boxed()
    }
}
