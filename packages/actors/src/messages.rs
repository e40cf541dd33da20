//! Message types for actor communication.

use ingest_core::{ConsumerStats, JobOutcome, Notification};
use ractor::RpcReplyPort;
use tokio::sync::OwnedSemaphorePermit;

/// A notification accepted by the dispatcher, together with the capacity
/// permit it occupies until its job finishes.
#[derive(Debug)]
pub struct Submission {
    pub notification: Notification,
    pub permit: OwnedSemaphorePermit,
}

/// Messages for the Dispatcher.
#[derive(Debug)]
pub enum DispatcherMessage {
    /// Queue a notification for the next idle worker.
    Submit { submission: Box<Submission> },

    /// A worker finished a job and is idle again.
    JobFinished {
        worker_id: String,
        outcome: JobOutcome,
        permit: OwnedSemaphorePermit,
    },

    /// Get dispatcher stats.
    GetStats { reply: RpcReplyPort<ConsumerStats> },

    /// Stop all workers and the dispatcher.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one job to completion.
    ProcessJob { submission: Box<Submission> },

    /// Shutdown the worker.
    Shutdown,
}
