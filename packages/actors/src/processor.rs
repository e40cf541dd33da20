//! Per-notification job orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ingest_core::{JobFailure, JobId, JobOutcome, JobTimestamp, Notification, ObjectLocation};
use pipeline::{OutputSink, Pipeline, PipelineError, Workspace};
use queue::QueueService;
use storage::BlobStore;
use tracing::Instrument;

/// Runs one notification end-to-end: decode, allocate a workspace, derive
/// the timestamp, fetch, extract, hand off outputs, acknowledge.
///
/// [`JobProcessor::execute`] never fails outward. The notification is
/// deleted from the queue only when every stage succeeded; on any failure
/// it is left for redelivery. The workspace is removed on every path.
pub struct JobProcessor {
    queue: Arc<dyn QueueService>,
    blobs: Arc<dyn BlobStore>,
    pipeline: Arc<Pipeline>,
    sink: Option<Arc<dyn OutputSink>>,
    scratch_root: PathBuf,
    job_timeout: Option<Duration>,
}

impl JobProcessor {
    /// Create a processor with the default pipeline and no output sink.
    pub fn new(
        queue: Arc<dyn QueueService>,
        blobs: Arc<dyn BlobStore>,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            blobs,
            pipeline: Arc::new(Pipeline::default()),
            sink: None,
            scratch_root: scratch_root.into(),
            job_timeout: None,
        }
    }

    /// Replace the extraction pipeline.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Hand final outputs to `sink` before the workspace is removed.
    pub fn with_sink(mut self, sink: impl OutputSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Abandon jobs that take longer than `timeout` (acknowledgment excluded).
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Process one notification to a terminal outcome.
    pub async fn execute(&self, notification: Notification) -> JobOutcome {
        let job_id = JobId::new();
        let span = tracing::info_span!(
            "job",
            %job_id,
            message_id = notification.message_id()
        );
        self.execute_job(notification).instrument(span).await
    }

    async fn execute_job(&self, notification: Notification) -> JobOutcome {
        let location = match notification.decode() {
            Ok(location) => location,
            Err(e) => {
                tracing::error!(error = %e, "Failed to decode notification, leaving it for redelivery");
                return JobOutcome::abandoned(JobFailure::Decode(e.to_string()));
            }
        };
        tracing::info!(bucket = %location.bucket, key = %location.key, "Processing object");

        let work = self.run(&location);
        let result = match self.job_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or(Err(JobFailure::TimedOut(limit))),
            None => work.await,
        };

        let outputs = match result {
            Ok(outputs) => outputs,
            Err(failure) => {
                tracing::error!(
                    bucket = %location.bucket,
                    key = %location.key,
                    stage = failure.stage(),
                    error = %failure,
                    "Job abandoned, leaving notification for redelivery"
                );
                return JobOutcome::abandoned(failure);
            }
        };

        match self.queue.delete(notification.receipt()).await {
            Ok(()) => {
                tracing::info!(key = %location.key, outputs, "Job acknowledged");
                JobOutcome::Acknowledged { outputs }
            }
            Err(e) => {
                tracing::warn!(
                    key = %location.key,
                    error = %e,
                    "Extraction finished but acknowledgment failed; expecting redelivery"
                );
                JobOutcome::AckFailed {
                    outputs,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Steps between decode and acknowledgment. Returns the number of outputs.
    async fn run(&self, location: &ObjectLocation) -> Result<usize, JobFailure> {
        let workspace = Workspace::create_in(&self.scratch_root)
            .map_err(|e| JobFailure::Workspace(e.to_string()))?;

        let timestamp = JobTimestamp::from_key(&location.key)
            .map_err(|e| JobFailure::Timestamp(e.to_string()))?;
        match timestamp.at() {
            Some(at) => tracing::debug!(
                %timestamp,
                %at,
                workspace = %workspace.root().display(),
                "Derived job timestamp"
            ),
            None => tracing::warn!(
                %timestamp,
                "Job timestamp is not a calendar date, using it verbatim"
            ),
        }

        let fetched = workspace
            .download_path(location.file_name())
            .map_err(|e| JobFailure::Fetch(e.to_string()))?;
        let bytes = storage::fetch_to_file(
            self.blobs.as_ref(),
            &location.bucket,
            &location.key,
            &fetched,
        )
        .await
        .map_err(|e| JobFailure::Fetch(e.to_string()))?;
        tracing::debug!(bytes, "Fetched object");

        // The workspace moves into the blocking task so it outlives any file
        // work even if this future is dropped on timeout. A dropped job must
        // not publish, so the guard flags it for the blocking task.
        let pipeline = self.pipeline.clone();
        let sink = self.sink.clone();
        let guard = AbandonOnDrop::default();
        let abandoned = guard.0.clone();
        let (workspace, result) = tokio::task::spawn_blocking(move || {
            let result = extract(
                &pipeline,
                sink.as_deref(),
                &workspace,
                &fetched,
                &timestamp,
                &abandoned,
            );
            (workspace, result)
        })
        .await
        .map_err(|e| JobFailure::Extraction(format!("extraction task failed: {e}")))?;
        drop(guard);

        let outputs = result
            .map_err(|e| JobFailure::Extraction(e.to_string()))?
            .ok_or_else(|| JobFailure::Extraction("job abandoned before publishing".to_string()))?;

        let root = workspace.root().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!(workspace = %root.display(), error = %e, "Failed to remove workspace");
        }
        Ok(outputs)
    }
}

/// Sets its flag when dropped, including when the owning job future is
/// cancelled by the job timeout.
#[derive(Default)]
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Run the pipeline and publish its outputs. Returns `None` without
/// publishing when the job was abandoned while extraction ran.
fn extract(
    pipeline: &Pipeline,
    sink: Option<&dyn OutputSink>,
    workspace: &Workspace,
    fetched: &Path,
    timestamp: &JobTimestamp,
    abandoned: &AtomicBool,
) -> Result<Option<usize>, PipelineError> {
    let report = pipeline.run(workspace, fetched)?;
    if abandoned.load(Ordering::Acquire) {
        tracing::warn!(%timestamp, "Job abandoned during extraction, outputs not published");
        return Ok(None);
    }
    if let Some(sink) = sink {
        sink.publish(timestamp, &report.decompressed)?;
    }
    Ok(Some(report.decompressed.len()))
}
