#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::JobProcessor;
use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use ingest_core::{Notification, ObjectLocation, ReceiptHandle};
use pipeline::{Decompressor, LocalDirSink, Zstd};
use queue::{MemoryQueue, QueueError, QueueService};
use storage::{BlobStore, BlobStream, Storage, StorageConfig, StorageError};
use tempfile::TempDir;

pub const BUCKET: &str = "geo-results";

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn zst(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, 3).expect("zstd encode")
}

/// Scratch and output roots, an in-memory queue and an in-memory blob store.
pub struct Harness {
    pub scratch: TempDir,
    pub output: TempDir,
    pub queue: Arc<MemoryQueue>,
    pub storage: Storage,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            scratch: tempfile::tempdir().expect("scratch dir"),
            output: tempfile::tempdir().expect("output dir"),
            queue: Arc::new(
                MemoryQueue::new(Duration::from_secs(300)).with_empty_wait(Duration::ZERO),
            ),
            storage: Storage::new(StorageConfig::memory()).expect("memory storage"),
        }
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch.path().join("work")
    }

    pub fn queue_service(&self) -> Arc<dyn QueueService> {
        self.queue.clone()
    }

    /// Processor over this harness's queue and storage, publishing to `output`.
    pub fn processor(&self) -> JobProcessor {
        self.processor_with(Arc::new(self.storage.clone()))
    }

    pub fn processor_with(&self, blobs: Arc<dyn BlobStore>) -> JobProcessor {
        JobProcessor::new(self.queue_service(), blobs, self.scratch_root())
            .with_sink(LocalDirSink::new(self.output.path()))
    }

    pub async fn seed(&self, key: &str, bytes: Vec<u8>) {
        self.storage
            .put_bytes(BUCKET, key, Bytes::from(bytes))
            .await
            .expect("seed object");
    }

    /// Enqueue a notification for `key`, returning its message id.
    pub fn notify(&self, key: &str) -> String {
        self.queue.send(ObjectLocation::new(BUCKET, key).to_json())
    }

    /// Receive exactly one notification from the queue.
    pub async fn receive_one(&self) -> Notification {
        let mut batch = self.queue.receive_batch(1).await.expect("receive");
        assert_eq!(batch.len(), 1, "expected one visible notification");
        batch.remove(0)
    }

    /// Workspace directories left under the scratch root.
    pub fn leftover_workspaces(&self) -> usize {
        match std::fs::read_dir(self.scratch_root()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    pub fn output_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(self.output.path(), &mut files);
        files.sort();
        files
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// A notification the queue never issued, for processor-only tests.
pub fn detached_notification(body: impl Into<String>) -> Notification {
    Notification::new("detached", ReceiptHandle::new("detached"), body)
}

/// Queue whose deletes always fail.
pub struct FailingDeletes(pub Arc<MemoryQueue>);

impl QueueService for FailingDeletes {
    fn receive_batch(&self, max: usize) -> BoxFuture<'_, Result<Vec<Notification>, QueueError>> {
        self.0.receive_batch(max)
    }

    fn delete<'a>(&'a self, receipt: &'a ReceiptHandle) -> BoxFuture<'a, Result<(), QueueError>> {
        async move { Err(QueueError::Delete(format!("throttled: {receipt}"))) }.boxed()
    }
}

/// Queue whose first `failures` receives fail.
pub struct FlakyReceives {
    pub inner: Arc<MemoryQueue>,
    pub failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyReceives {
    pub fn new(inner: Arc<MemoryQueue>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl QueueService for FlakyReceives {
    fn receive_batch(&self, max: usize) -> BoxFuture<'_, Result<Vec<Notification>, QueueError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return async { Err(QueueError::Receive("queue unavailable".into())) }.boxed();
        }
        self.inner.receive_batch(max)
    }

    fn delete<'a>(&'a self, receipt: &'a ReceiptHandle) -> BoxFuture<'a, Result<(), QueueError>> {
        self.inner.delete(receipt)
    }
}

/// Blob store that holds every fetch open for `delay` and records the
/// highest number of fetches in progress at once.
pub struct SlowBlobs {
    pub inner: Storage,
    pub delay: Duration,
    pub current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl SlowBlobs {
    pub fn new(inner: Storage, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl BlobStore for SlowBlobs {
    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<BlobStream, StorageError>> {
        async move {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let result = self.inner.get(container, key).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            result
        }
        .boxed()
    }
}

/// Blob store that panics for keys containing `panic`.
pub struct PanickingBlobs(pub Storage);

impl BlobStore for PanickingBlobs {
    fn get<'a>(
        &'a self,
        container: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<BlobStream, StorageError>> {
        if key.contains("panic") {
            panic!("blob store blew up on {key}");
        }
        self.0.get(container, key)
    }
}

/// Blob store that never answers.
pub struct HangingBlobs;

impl BlobStore for HangingBlobs {
    fn get<'a>(
        &'a self,
        _container: &'a str,
        _key: &'a str,
    ) -> BoxFuture<'a, Result<BlobStream, StorageError>> {
        futures_util::future::pending().boxed()
    }
}

/// Zstd decompressor that sleeps on its blocking thread before each entry.
pub struct SlowDecompressor {
    pub delay: Duration,
    pub inner: Zstd,
}

impl SlowDecompressor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: Zstd::new(),
        }
    }
}

impl Decompressor for SlowDecompressor {
    fn suffix(&self) -> &str {
        self.inner.suffix()
    }

    fn decompress(
        &self,
        reader: &mut dyn std::io::Read,
        writer: &mut dyn std::io::Write,
    ) -> std::io::Result<u64> {
        std::thread::sleep(self.delay);
        self.inner.decompress(reader, writer)
    }
}
