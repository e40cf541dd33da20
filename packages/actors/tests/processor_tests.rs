//! Job processor behavior against the in-memory queue and blob store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use actors::JobProcessor;
use common::{BUCKET, FailingDeletes, Harness, HangingBlobs, SlowDecompressor, TestResult, zst};
use ingest_core::{JobFailure, JobOutcome, ObjectLocation};
use pipeline::{LocalDirSink, Passthrough, Pipeline};

const KEY: &str = "runs/site-a/scan-2024-03-15-10-30-00.json.zst";

#[tokio::test]
async fn successful_job_publishes_and_acknowledges() -> TestResult {
    let h = Harness::new();
    h.seed(KEY, zst(b"{\"points\": 42}")).await;
    let id = h.notify(KEY);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert_eq!(outcome, JobOutcome::Acknowledged { outputs: 1 });
    assert!(!h.queue.contains(&id));

    let files = h.output_files();
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0],
        h.output.path().join("2024-03-15-10-30-00").join("scan-2024-03-15-10-30-00.json")
    );
    assert_eq!(std::fs::read(&files[0])?, b"{\"points\": 42}");
    assert_eq!(h.leftover_workspaces(), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_left_on_queue() -> TestResult {
    let h = Harness::new();
    let id = h.queue.send("{not json");

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::Decode(_))));
    assert!(h.queue.contains(&id));
    assert!(h.output_files().is_empty());
    assert_eq!(h.leftover_workspaces(), 0);
    Ok(())
}

#[tokio::test]
async fn missing_fields_are_decode_failures() -> TestResult {
    let h = Harness::new();
    let id = h.queue.send(r#"{"bucketName": "geo-results"}"#);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::Decode(_))));
    assert!(h.queue.contains(&id));
    Ok(())
}

#[tokio::test]
async fn unusable_scratch_root_abandons_job() -> TestResult {
    let h = Harness::new();
    std::fs::write(h.scratch_root(), b"occupied")?;
    h.seed(KEY, zst(b"payload")).await;
    let id = h.notify(KEY);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::Workspace(_))));
    assert!(h.queue.contains(&id));
    assert!(h.output_files().is_empty());
    Ok(())
}

#[tokio::test]
async fn key_without_timestamp_abandons_job() -> TestResult {
    let h = Harness::new();
    let key = "runs/site-a/scan-latest.json.zst";
    h.seed(key, zst(b"payload")).await;
    let id = h.notify(key);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::Timestamp(_))));
    assert!(h.queue.contains(&id));
    assert_eq!(h.leftover_workspaces(), 0);
    Ok(())
}

#[tokio::test]
async fn timestamp_in_directory_only_is_not_used() -> TestResult {
    let h = Harness::new();
    let key = "runs/2024-03-15-10-30-00/scan.json.zst";
    h.seed(key, zst(b"payload")).await;
    let id = h.notify(key);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::Timestamp(_))));
    assert!(h.queue.contains(&id));
    Ok(())
}

#[tokio::test]
async fn missing_object_abandons_job() -> TestResult {
    let h = Harness::new();
    let id = h.notify(KEY);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::Fetch(_))));
    assert!(h.queue.contains(&id));
    assert_eq!(h.leftover_workspaces(), 0);
    Ok(())
}

#[tokio::test]
async fn corrupt_archive_abandons_job() -> TestResult {
    let h = Harness::new();
    h.seed(KEY, b"definitely not zstd".to_vec()).await;
    let id = h.notify(KEY);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::Extraction(_))));
    assert!(h.queue.contains(&id));
    assert!(h.output_files().is_empty());
    assert_eq!(h.leftover_workspaces(), 0);
    Ok(())
}

#[tokio::test]
async fn uncompressed_object_is_acknowledged_without_outputs() -> TestResult {
    let h = Harness::new();
    let key = "runs/scan-2024-03-15-10-30-00.json";
    h.seed(key, b"{}".to_vec()).await;
    let id = h.notify(key);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert_eq!(outcome, JobOutcome::Acknowledged { outputs: 0 });
    assert!(!h.queue.contains(&id));
    assert!(h.output_files().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_delete_reports_ack_failure() -> TestResult {
    let h = Harness::new();
    h.seed(KEY, zst(b"payload")).await;
    let id = h.notify(KEY);

    let processor = JobProcessor::new(
        Arc::new(FailingDeletes(h.queue.clone())),
        Arc::new(h.storage.clone()),
        h.scratch_root(),
    )
    .with_sink(LocalDirSink::new(h.output.path()));

    let outcome = processor.execute(h.receive_one().await).await;

    assert!(matches!(outcome, JobOutcome::AckFailed { outputs: 1, .. }));
    assert!(h.queue.contains(&id));
    assert_eq!(h.output_files().len(), 1);
    assert_eq!(h.leftover_workspaces(), 0);
    Ok(())
}

#[tokio::test]
async fn reprocessing_same_object_is_idempotent() -> TestResult {
    let h = Harness::new();
    h.seed(KEY, zst(b"same bytes every time")).await;
    let processor = h.processor();

    h.notify(KEY);
    let first = processor.execute(h.receive_one().await).await;
    let files = h.output_files();
    let first_bytes = std::fs::read(&files[0])?;

    h.notify(KEY);
    let second = processor.execute(h.receive_one().await).await;

    assert_eq!(first, second);
    assert_eq!(h.output_files(), files);
    assert_eq!(std::fs::read(&files[0])?, first_bytes);
    assert!(h.queue.is_empty());
    Ok(())
}

#[tokio::test]
async fn slow_job_times_out_and_cleans_up() -> TestResult {
    let h = Harness::new();
    let id = h.notify(KEY);
    let processor = h
        .processor_with(Arc::new(HangingBlobs))
        .with_job_timeout(Duration::from_millis(100));

    let outcome = processor.execute(h.receive_one().await).await;

    assert!(matches!(outcome.failure(), Some(JobFailure::TimedOut(_))));
    assert!(h.queue.contains(&id));
    assert_eq!(h.leftover_workspaces(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_during_extraction_publishes_nothing_and_cleans_up() -> TestResult {
    let h = Harness::new();
    h.seed(KEY, zst(b"slow to extract")).await;
    let id = h.notify(KEY);
    let processor = h
        .processor()
        .with_pipeline(Pipeline::new(
            Passthrough,
            SlowDecompressor::new(Duration::from_millis(500)),
        ))
        .with_job_timeout(Duration::from_millis(100));

    let outcome = processor.execute(h.receive_one().await).await;
    assert!(matches!(outcome.failure(), Some(JobFailure::TimedOut(_))));

    // Extraction is still running on its blocking thread and owns the
    // workspace until it returns.
    for _ in 0..300 {
        if h.leftover_workspaces() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.leftover_workspaces(), 0);
    assert!(h.output_files().is_empty());
    assert!(h.queue.contains(&id));
    Ok(())
}

#[tokio::test]
async fn non_calendar_timestamp_is_still_processed() -> TestResult {
    let h = Harness::new();
    let key = "runs/scan-2024-02-30-10-00-00.json.zst";
    h.seed(key, zst(b"leap day that never was")).await;
    let id = h.notify(key);

    let outcome = h.processor().execute(h.receive_one().await).await;

    assert_eq!(outcome, JobOutcome::Acknowledged { outputs: 1 });
    assert!(!h.queue.contains(&id));
    assert_eq!(
        h.output_files(),
        vec![h.output.path().join("2024-02-30-10-00-00").join("scan-2024-02-30-10-00-00.json")]
    );
    Ok(())
}

#[tokio::test]
async fn detached_receipt_is_not_acknowledged() -> TestResult {
    let h = Harness::new();
    h.seed(KEY, zst(b"payload")).await;
    let body = ObjectLocation::new(BUCKET, KEY).to_json();

    let outcome = h
        .processor()
        .execute(common::detached_notification(body))
        .await;

    assert!(matches!(outcome, JobOutcome::AckFailed { .. }));
    Ok(())
}
