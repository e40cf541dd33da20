//! Worker actor for executing jobs.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use ingest_core::{JobFailure, JobOutcome};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::{DispatcherMessage, Submission, WorkerMessage};
use crate::processor::JobProcessor;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Shared job processor.
    pub processor: Arc<JobProcessor>,
    /// Dispatcher to report back to.
    pub dispatcher: ActorRef<DispatcherMessage>,
    /// Jobs run by this worker.
    pub jobs_run: u64,
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub processor: Arc<JobProcessor>,
    pub dispatcher: ActorRef<DispatcherMessage>,
}

/// Worker actor that runs one job at a time.
///
/// A panic inside a job is caught here and reported as a crashed job, so
/// the worker stays in the pool.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState {
            worker_id: args.worker_id,
            processor: args.processor,
            dispatcher: args.dispatcher,
            jobs_run: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::ProcessJob { submission } => {
                let Submission {
                    notification,
                    permit,
                } = *submission;
                let message_id = notification.message_id().to_string();

                let run = AssertUnwindSafe(state.processor.execute(notification));
                let outcome = match run.catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        tracing::error!(
                            worker_id = %state.worker_id,
                            %message_id,
                            %reason,
                            "Job panicked, leaving notification for redelivery"
                        );
                        JobOutcome::abandoned(JobFailure::Crashed(reason))
                    }
                };
                state.jobs_run += 1;
                tracing::debug!(
                    worker_id = %state.worker_id,
                    %message_id,
                    outcome = outcome.as_str(),
                    "Job finished"
                );

                state.dispatcher.send_message(DispatcherMessage::JobFinished {
                    worker_id: state.worker_id.clone(),
                    outcome,
                    permit,
                })?;
            }

            WorkerMessage::Shutdown => {
                tracing::debug!(
                    "Shutting down worker: {} ({} jobs run)",
                    state.worker_id,
                    state.jobs_run
                );
                myself.stop(None);
            }
        }

        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
