//! Ingestion consumer: polls the queue, fetches each referenced object,
//! extracts it, and acknowledges only fully processed notifications.

mod config;

use std::sync::Arc;

use actors::{Dispatcher, JobProcessor, Poller};
use pipeline::{LocalDirSink, Passthrough, Pipeline, Zstd};
use queue::{MemoryQueue, QueueService, SqsQueue};
use storage::Storage;

use crate::config::{ConsumerConfig, QueueBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConsumerConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    tracing::info!(
        queue = config.queue.as_str(),
        workers = config.dispatcher.pool_size,
        scratch = %config.scratch_dir.display(),
        "Starting ingest consumer"
    );

    let storage = Storage::from_env()?;
    tracing::info!(backend = storage.kind_str(), "Blob storage ready");

    let queue: Arc<dyn QueueService> = match &config.queue {
        QueueBackend::Sqs(sqs) => Arc::new(SqsQueue::connect(sqs.clone()).await),
        QueueBackend::Memory { visibility_timeout } => {
            tracing::warn!("Using in-memory queue; no external notifications will arrive");
            Arc::new(MemoryQueue::new(*visibility_timeout))
        }
    };

    let pipeline = Pipeline::new(Passthrough, Zstd::with_suffix(config.compressed_suffix.clone()));
    tracing::info!(suffix = pipeline.suffix(), "Extraction pipeline ready");
    let mut processor = JobProcessor::new(queue.clone(), Arc::new(storage), &config.scratch_dir)
        .with_pipeline(pipeline);
    if let Some(output_dir) = &config.output_dir {
        tracing::info!(output = %output_dir.display(), "Publishing outputs");
        processor = processor.with_sink(LocalDirSink::new(output_dir));
    }
    if let Some(timeout) = config.job_timeout {
        processor = processor.with_job_timeout(timeout);
    }

    let (dispatcher, handle) = Dispatcher::start(Arc::new(processor), config.dispatcher).await?;
    let poller = Poller::new(queue, dispatcher.clone(), config.poller);

    poller.run(shutdown_signal()).await?;

    tracing::info!("Waiting for in-flight jobs to finish");
    if let Ok(stats) = dispatcher.stats().await {
        tracing::info!(
            in_flight = stats.in_flight,
            pending = stats.pending,
            "Draining dispatcher"
        );
    }
    dispatcher.wait_idle().await?;
    let stats = dispatcher.stats().await?;
    dispatcher.shutdown().await?;
    handle.await?;

    tracing::info!(
        received = stats.received,
        acknowledged = stats.acknowledged,
        abandoned = stats.abandoned,
        ack_failed = stats.ack_failed,
        crashed = stats.crashed,
        "Consumer stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received, stopping poller");
}
