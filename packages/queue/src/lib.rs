//! Queue service access for the ingestion consumer.
//!
//! The consumer only needs two operations from its queue: receive a batch
//! of notifications and delete one by receipt handle. Visibility timeout
//! and redelivery are owned by the queue itself.
//!
//! - `SqsQueue` - AWS SQS, used in production
//! - `MemoryQueue` - in-process queue with SQS-like visibility semantics,
//!   used for local runs and tests

mod memory;
mod sqs;

use futures_util::future::BoxFuture;
use ingest_core::{Notification, ReceiptHandle};

pub use memory::MemoryQueue;
pub use sqs::{SqsQueue, SqsQueueConfig};

/// Queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("receive failed: {0}")]
    Receive(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("receipt handle is not valid: {0}")]
    InvalidReceipt(String),
}

/// Operations consumed from the queue service.
///
/// Implementations are shared by the poller and every worker, so they must
/// be safe for concurrent independent use.
pub trait QueueService: Send + Sync + 'static {
    /// Receive up to `max` notifications. May return fewer, including none.
    fn receive_batch(&self, max: usize) -> BoxFuture<'_, Result<Vec<Notification>, QueueError>>;

    /// Delete (acknowledge) a received notification.
    fn delete<'a>(&'a self, receipt: &'a ReceiptHandle) -> BoxFuture<'a, Result<(), QueueError>>;
}
