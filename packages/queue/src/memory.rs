//! In-process queue with SQS-like visibility semantics.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use ingest_core::{Notification, ReceiptHandle};
use tokio::time::Instant;
use ulid::Ulid;

use crate::{QueueError, QueueService};

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: String,
    /// Receipt issued by the latest receive; `None` until first received.
    receipt: Option<String>,
    visible_at: Instant,
    receive_count: u32,
}

/// In-memory queue.
///
/// A received message stays in the queue but is hidden for the visibility
/// timeout; if it is not deleted by then it is delivered again with a new
/// receipt handle. Deleting with a stale receipt fails, as it does on SQS.
#[derive(Debug)]
pub struct MemoryQueue {
    entries: Mutex<Vec<Entry>>,
    visibility_timeout: Duration,
    empty_wait: Duration,
}

impl MemoryQueue {
    /// Create an empty queue with the given visibility timeout.
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            visibility_timeout,
            empty_wait: Duration::from_millis(50),
        }
    }

    /// Set how long an empty receive waits before returning.
    pub fn with_empty_wait(mut self, wait: Duration) -> Self {
        self.empty_wait = wait;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a message body, returning its message id.
    pub fn send(&self, body: impl Into<String>) -> String {
        let message_id = Ulid::new().to_string();
        self.lock().push(Entry {
            message_id: message_id.clone(),
            body: body.into(),
            receipt: None,
            visible_at: Instant::now(),
            receive_count: 0,
        });
        message_id
    }

    /// Messages still in the queue, visible or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages received but neither deleted nor visible again yet.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.lock().iter().filter(|e| e.visible_at > now).count()
    }

    /// Whether a message with this id is still in the queue.
    pub fn contains(&self, message_id: &str) -> bool {
        self.lock().iter().any(|e| e.message_id == message_id)
    }

    /// How many times a message has been delivered.
    pub fn receive_count(&self, message_id: &str) -> Option<u32> {
        self.lock()
            .iter()
            .find(|e| e.message_id == message_id)
            .map(|e| e.receive_count)
    }

    fn take_visible(&self, max: usize) -> Vec<Notification> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .take(max)
            .map(|e| {
                let receipt = Ulid::new().to_string();
                e.receipt = Some(receipt.clone());
                e.visible_at = now + self.visibility_timeout;
                e.receive_count += 1;
                Notification::new(&e.message_id, ReceiptHandle::new(receipt), &e.body)
            })
            .collect()
    }
}

impl QueueService for MemoryQueue {
    fn receive_batch(&self, max: usize) -> BoxFuture<'_, Result<Vec<Notification>, QueueError>> {
        async move {
            let batch = self.take_visible(max);
            if !batch.is_empty() || self.empty_wait.is_zero() {
                return Ok(batch);
            }
            tokio::time::sleep(self.empty_wait).await;
            Ok(self.take_visible(max))
        }
        .boxed()
    }

    fn delete<'a>(&'a self, receipt: &'a ReceiptHandle) -> BoxFuture<'a, Result<(), QueueError>> {
        async move {
            let mut entries = self.lock();
            let position = entries
                .iter()
                .position(|e| e.receipt.as_deref() == Some(receipt.as_str()))
                .ok_or_else(|| QueueError::InvalidReceipt(receipt.to_string()))?;
            let entry = entries.remove(position);
            tracing::debug!(message_id = %entry.message_id, "Deleted message");
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_respects_batch_size() -> Result<(), QueueError> {
        let queue = MemoryQueue::new(Duration::from_secs(30)).with_empty_wait(Duration::ZERO);
        for i in 0..5 {
            queue.send(format!("body-{i}"));
        }

        let first = queue.receive_batch(3).await?;
        assert_eq!(first.len(), 3);
        let second = queue.receive_batch(3).await?;
        assert_eq!(second.len(), 2);
        assert!(queue.receive_batch(3).await?.is_empty());
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.in_flight(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_message() -> Result<(), QueueError> {
        let queue = MemoryQueue::new(Duration::from_secs(30)).with_empty_wait(Duration::ZERO);
        let id = queue.send("hello");

        let batch = queue.receive_batch(10).await?;
        assert_eq!(batch[0].body(), "hello");
        assert_eq!(batch[0].message_id(), id);

        queue.delete(batch[0].receipt()).await?;
        assert!(!queue.contains(&id));
        assert!(queue.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_message_is_redelivered() -> Result<(), QueueError> {
        let queue = MemoryQueue::new(Duration::from_secs(30)).with_empty_wait(Duration::ZERO);
        let id = queue.send("retry me");

        let first = queue.receive_batch(10).await?;
        assert_eq!(first.len(), 1);
        assert!(queue.receive_batch(10).await?.is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = queue.receive_batch(10).await?;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id(), id);
        assert_ne!(second[0].receipt(), first[0].receipt());
        assert_eq!(queue.receive_count(&id), Some(2));

        // The first delivery's receipt is stale now.
        let stale = queue.delete(first[0].receipt()).await;
        assert!(matches!(stale, Err(QueueError::InvalidReceipt(_))));
        queue.delete(second[0].receipt()).await?;
        assert!(queue.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn empty_receive_waits_then_returns_nothing() -> Result<(), QueueError> {
        let queue = MemoryQueue::new(Duration::from_secs(30)).with_empty_wait(Duration::from_secs(1));
        let started = Instant::now();
        assert!(queue.receive_batch(10).await?.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(1));
        Ok(())
    }
}
