//! Dispatcher actor: a fixed pool of workers fed from a bounded queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ingest_core::{ConsumerStats, Notification};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, MessagingErr, SupervisionEvent};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::messages::{DispatcherMessage, Submission, WorkerMessage};
use crate::processor::JobProcessor;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Dispatcher sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of jobs that run in parallel.
    pub pool_size: usize,
    /// Submissions that may wait for a worker before `submit` blocks.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 10,
        }
    }
}

/// Dispatcher errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid dispatcher config: {0}")]
    InvalidConfig(String),

    #[error("failed to start dispatcher: {0}")]
    Spawn(String),

    #[error("dispatcher is closed")]
    Closed,
}

/// State for the dispatcher actor.
pub struct DispatcherState {
    /// Shared job processor handed to every worker.
    processor: Arc<JobProcessor>,
    /// Target pool size.
    pool_size: usize,
    /// Live workers by ID.
    workers: HashMap<String, ActorRef<WorkerMessage>>,
    /// Worker IDs by actor ID, for supervision events.
    by_actor: HashMap<ActorId, String>,
    /// Workers waiting for a job.
    idle: VecDeque<String>,
    /// Workers running a job.
    busy: HashSet<String>,
    /// Submissions waiting for a worker.
    pending: VecDeque<Submission>,
    /// Counters since startup.
    stats: ConsumerStats,
    /// Set once shutdown starts; dead workers are no longer replaced.
    shutting_down: bool,
    /// Worker counter for unique IDs.
    worker_counter: u64,
}

impl DispatcherState {
    fn new(processor: Arc<JobProcessor>, pool_size: usize) -> Self {
        Self {
            processor,
            pool_size,
            workers: HashMap::new(),
            by_actor: HashMap::new(),
            idle: VecDeque::new(),
            busy: HashSet::new(),
            pending: VecDeque::new(),
            stats: ConsumerStats::default(),
            shutting_down: false,
            worker_counter: 0,
        }
    }

    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("worker-{}", self.worker_counter)
    }

    /// Hand pending submissions to idle workers.
    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let Some(worker_id) = self.idle.pop_front() else {
                break;
            };
            let Some(worker) = self.workers.get(&worker_id) else {
                continue;
            };
            let Some(submission) = self.pending.pop_front() else {
                break;
            };

            let message = WorkerMessage::ProcessJob {
                submission: Box::new(submission),
            };
            match worker.send_message(message) {
                Ok(()) => {
                    self.busy.insert(worker_id);
                }
                Err(MessagingErr::SendErr(WorkerMessage::ProcessJob { submission })) => {
                    tracing::warn!("Worker {} is unavailable, requeueing job", worker_id);
                    self.pending.push_front(*submission);
                }
                Err(_) => {
                    tracing::warn!("Worker {} is unavailable, job left for redelivery", worker_id);
                }
            }
        }
    }

    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            in_flight: self.busy.len() as u64,
            pending: self.pending.len() as u64,
            workers: self.workers.len() as u64,
            ..self.stats.clone()
        }
    }
}

async fn spawn_worker(
    myself: &ActorRef<DispatcherMessage>,
    state: &mut DispatcherState,
) -> Result<(), ActorProcessingErr> {
    let worker_id = state.next_worker_id();
    let args = WorkerArgs {
        worker_id: worker_id.clone(),
        processor: state.processor.clone(),
        dispatcher: myself.clone(),
    };

    let (worker, _handle) = Actor::spawn_linked(None, WorkerActor, args, myself.get_cell())
        .await
        .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

    state.by_actor.insert(worker.get_id(), worker_id.clone());
    state.workers.insert(worker_id.clone(), worker);
    state.idle.push_back(worker_id);
    Ok(())
}

/// Dispatcher actor that supervises the worker pool.
pub struct DispatcherActor;

/// Dispatcher actor arguments.
pub struct DispatcherArgs {
    pub processor: Arc<JobProcessor>,
    pub pool_size: usize,
}

impl Actor for DispatcherActor {
    type Msg = DispatcherMessage;
    type State = DispatcherState;
    type Arguments = DispatcherArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting dispatcher with {} workers", args.pool_size);

        let mut state = DispatcherState::new(args.processor, args.pool_size);
        for _ in 0..state.pool_size {
            spawn_worker(&myself, &mut state).await?;
        }
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DispatcherMessage::Submit { submission } => {
                state.stats.received += 1;
                state.pending.push_back(*submission);
                state.dispatch();
            }

            DispatcherMessage::JobFinished {
                worker_id,
                outcome,
                permit,
            } => {
                state.stats.record(&outcome);
                state.busy.remove(&worker_id);
                if state.workers.contains_key(&worker_id) {
                    state.idle.push_back(worker_id);
                }
                // Capacity is released only after the outcome is counted.
                drop(permit);
                state.dispatch();
            }

            DispatcherMessage::GetStats { reply } => {
                let _ = reply.send(state.snapshot());
            }

            DispatcherMessage::Shutdown => {
                tracing::info!("Shutting down dispatcher");
                state.shutting_down = true;
                for worker in state.workers.values() {
                    let _ = worker.send_message(WorkerMessage::Shutdown);
                }
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, reason) = match message {
            SupervisionEvent::ActorFailed(cell, err) => (cell, Some(err.to_string())),
            SupervisionEvent::ActorTerminated(cell, _, reason) => (cell, reason),
            _ => return Ok(()),
        };

        let Some(worker_id) = state.by_actor.remove(&cell.get_id()) else {
            return Ok(());
        };
        state.workers.remove(&worker_id);
        state.idle.retain(|id| *id != worker_id);

        if state.busy.remove(&worker_id) {
            // The job's permit died with the worker; its notification is
            // left for redelivery.
            state.stats.abandoned += 1;
            state.stats.crashed += 1;
        }

        if state.shutting_down {
            return Ok(());
        }

        tracing::error!(
            "Worker {} stopped unexpectedly ({}), starting a replacement",
            worker_id,
            reason.as_deref().unwrap_or("no reason")
        );
        spawn_worker(&myself, state).await?;
        state.dispatch();
        Ok(())
    }
}

/// Handle for submitting notifications to the dispatcher.
///
/// Capacity is `pool_size + queue_capacity` submissions: once that many
/// jobs are running or waiting, [`Dispatcher::submit`] waits for one to
/// finish rather than dropping anything.
#[derive(Clone)]
pub struct Dispatcher {
    actor: ActorRef<DispatcherMessage>,
    capacity: Arc<Semaphore>,
    total: u32,
}

impl Dispatcher {
    /// Start the dispatcher and its workers.
    pub async fn start(
        processor: Arc<JobProcessor>,
        config: DispatcherConfig,
    ) -> Result<(Self, JoinHandle<()>), DispatchError> {
        if config.pool_size == 0 {
            return Err(DispatchError::InvalidConfig(
                "pool_size must be at least 1".to_string(),
            ));
        }

        let total = config
            .pool_size
            .checked_add(config.queue_capacity)
            .filter(|total| *total <= Semaphore::MAX_PERMITS)
            .and_then(|total| u32::try_from(total).ok())
            .ok_or_else(|| {
                DispatchError::InvalidConfig(format!(
                    "pool_size + queue_capacity must not exceed {}",
                    u32::MAX
                ))
            })?;
        let args = DispatcherArgs {
            processor,
            pool_size: config.pool_size,
        };
        let (actor, handle) = Actor::spawn(None, DispatcherActor, args)
            .await
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        let dispatcher = Self {
            actor,
            capacity: Arc::new(Semaphore::new(total as usize)),
            total,
        };
        Ok((dispatcher, handle))
    }

    /// Hand a notification to the pool, waiting while the pool is saturated.
    pub async fn submit(&self, notification: Notification) -> Result<(), DispatchError> {
        let permit = self
            .capacity
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Closed)?;

        let submission = Box::new(Submission {
            notification,
            permit,
        });
        self.actor
            .send_message(DispatcherMessage::Submit { submission })
            .map_err(|_| DispatchError::Closed)
    }

    /// Current counters.
    pub async fn stats(&self) -> Result<ConsumerStats, DispatchError> {
        let result = ractor::rpc::call(
            &self.actor,
            |reply| DispatcherMessage::GetStats { reply },
            Some(Duration::from_secs(5)),
        )
        .await;
        match result {
            Ok(ractor::rpc::CallResult::Success(stats)) => Ok(stats),
            _ => Err(DispatchError::Closed),
        }
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) -> Result<(), DispatchError> {
        let _all = self
            .capacity
            .acquire_many(self.total)
            .await
            .map_err(|_| DispatchError::Closed)?;
        Ok(())
    }

    /// Let in-flight jobs finish, then stop the workers and the dispatcher.
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        self.wait_idle().await?;
        self.capacity.close();
        self.actor
            .send_message(DispatcherMessage::Shutdown)
            .map_err(|_| DispatchError::Closed)
    }
}
