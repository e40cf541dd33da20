//! Actor system for the ingestion consumer.
//!
//! This crate provides the concurrency core: the job processor, the
//! Ractor-based worker pool that runs it, and the poller that feeds the pool.
//!
//! # Architecture
//!
//! - `Poller` - receives batches from the queue and submits each notification
//! - `Dispatcher` - handle to the `DispatcherActor`, which supervises a fixed
//!   pool of `WorkerActor`s and queues submissions with back-pressure
//! - `WorkerActor` - runs `JobProcessor::execute` for one job at a time
//! - `JobProcessor` - decode, fetch, extract, acknowledge
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Dispatcher, DispatcherConfig, JobProcessor, Poller, PollerConfig};
//!
//! let processor = Arc::new(JobProcessor::new(queue.clone(), blobs, "/tmp/ingest"));
//! let (dispatcher, _handle) = Dispatcher::start(processor, DispatcherConfig::default()).await?;
//! let poller = Poller::new(queue, dispatcher.clone(), PollerConfig::default());
//! poller.run(tokio::signal::ctrl_c().map(|_| ())).await?;
//! dispatcher.shutdown().await?;
//! ```

mod dispatcher;
mod messages;
mod poller;
mod processor;
mod worker_actor;

pub use dispatcher::{DispatchError, Dispatcher, DispatcherActor, DispatcherConfig};
pub use messages::{DispatcherMessage, Submission, WorkerMessage};
pub use poller::{Poller, PollerConfig};
pub use processor::JobProcessor;
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
