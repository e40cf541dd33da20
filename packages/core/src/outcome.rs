//! Outcome types reported by the job processor and the dispatcher.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a job was abandoned without acknowledgment.
///
/// Every variant leaves the notification on the queue, so it becomes
/// visible again once its visibility timeout expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum JobFailure {
    /// The notification body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
    /// The scratch workspace could not be allocated.
    #[error("workspace allocation failed: {0}")]
    Workspace(String),
    /// The object key carries no usable timestamp.
    #[error("timestamp derivation failed: {0}")]
    Timestamp(String),
    /// The object could not be fetched from the blob store.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// A pipeline stage (or the output handoff) failed.
    #[error("extraction failed: {0}")]
    Extraction(String),
    /// The job exceeded its deadline.
    #[error("job timed out after {0:?}")]
    TimedOut(Duration),
    /// The job panicked; caught by the worker.
    #[error("job crashed: {0}")]
    Crashed(String),
}

impl JobFailure {
    /// Short stage label for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            JobFailure::Decode(_) => "decode",
            JobFailure::Workspace(_) => "workspace",
            JobFailure::Timestamp(_) => "timestamp",
            JobFailure::Fetch(_) => "fetch",
            JobFailure::Extraction(_) => "extraction",
            JobFailure::TimedOut(_) => "timeout",
            JobFailure::Crashed(_) => "crashed",
        }
    }
}

/// Terminal result of processing one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Every stage succeeded and the notification was deleted.
    Acknowledged { outputs: usize },
    /// The job failed; the notification was not deleted.
    Abandoned { failure: JobFailure },
    /// Every stage succeeded but the delete call failed. The queue will
    /// redeliver and the job re-runs idempotently.
    AckFailed { outputs: usize, error: String },
}

impl JobOutcome {
    pub fn abandoned(failure: JobFailure) -> Self {
        JobOutcome::Abandoned { failure }
    }

    /// Whether the notification was deleted from the queue.
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, JobOutcome::Acknowledged { .. })
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobOutcome::Abandoned { failure } => Some(failure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Acknowledged { .. } => "acknowledged",
            JobOutcome::Abandoned { .. } => "abandoned",
            JobOutcome::AckFailed { .. } => "ack_failed",
        }
    }
}

/// Counters kept by the dispatcher since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerStats {
    /// Notifications submitted to the dispatcher.
    pub received: u64,
    /// Jobs whose notification was deleted.
    pub acknowledged: u64,
    /// Jobs abandoned without acknowledgment (including crashes).
    pub abandoned: u64,
    /// Jobs that succeeded but whose delete failed.
    pub ack_failed: u64,
    /// Jobs that panicked or whose worker died.
    pub crashed: u64,
    /// Jobs currently executing.
    pub in_flight: u64,
    /// Jobs waiting for a free worker.
    pub pending: u64,
    /// Live workers in the pool.
    pub workers: u64,
}

impl ConsumerStats {
    /// Total jobs that reached a terminal outcome.
    pub fn finished(&self) -> u64 {
        self.acknowledged + self.abandoned + self.ack_failed
    }

    /// Record a terminal outcome.
    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Acknowledged { .. } => self.acknowledged += 1,
            JobOutcome::Abandoned { failure } => {
                self.abandoned += 1;
                if matches!(failure, JobFailure::Crashed(_)) {
                    self.crashed += 1;
                }
            }
            JobOutcome::AckFailed { .. } => self.ack_failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_record_outcomes() {
        let mut stats = ConsumerStats::default();
        stats.record(&JobOutcome::Acknowledged { outputs: 1 });
        stats.record(&JobOutcome::abandoned(JobFailure::Fetch("not found".into())));
        stats.record(&JobOutcome::abandoned(JobFailure::Crashed("boom".into())));
        stats.record(&JobOutcome::AckFailed {
            outputs: 0,
            error: "throttled".into(),
        });

        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.crashed, 1);
        assert_eq!(stats.ack_failed, 1);
        assert_eq!(stats.finished(), 4);
    }

    #[test]
    fn outcome_serializes_with_stage_tag() {
        let outcome = JobOutcome::abandoned(JobFailure::Timestamp("no timestamp".into()));
        let json = serde_json::to_value(&outcome).expect("serializable");
        assert_eq!(json["outcome"], "abandoned");
        assert_eq!(json["failure"]["stage"], "timestamp");
        assert_eq!(outcome.failure().map(JobFailure::stage), Some("timestamp"));
        assert!(!outcome.is_acknowledged());
    }
}
