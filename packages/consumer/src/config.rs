//! Consumer configuration from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use actors::{DispatcherConfig, PollerConfig};
use queue::SqsQueueConfig;
use tracing::Level;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Where notifications come from.
#[derive(Debug, Clone)]
pub enum QueueBackend {
    Sqs(SqsQueueConfig),
    /// In-process queue; nothing outside the process can publish to it.
    Memory { visibility_timeout: Duration },
}

impl QueueBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueBackend::Sqs(_) => "sqs",
            QueueBackend::Memory { .. } => "memory",
        }
    }
}

/// Everything the consumer binary needs apart from blob storage, which
/// reads its own variables.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: QueueBackend,
    pub dispatcher: DispatcherConfig,
    pub poller: PollerConfig,
    pub scratch_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub compressed_suffix: String,
    pub job_timeout: Option<Duration>,
    pub log_level: Level,
}

impl ConsumerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).and_then(non_empty);

        let visibility_timeout = parse::<u64>(&var, "SQS_VISIBILITY_TIMEOUT_SECS")?
            .map(Duration::from_secs);

        let queue = match var("QUEUE_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => sqs_backend(&var, visibility_timeout)?,
            Some(backend) if backend == "sqs" => sqs_backend(&var, visibility_timeout)?,
            Some(backend) if backend == "memory" => QueueBackend::Memory {
                visibility_timeout: visibility_timeout.unwrap_or(Duration::from_secs(30)),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "QUEUE_BACKEND",
                    value: other,
                    reason: "expected sqs or memory".to_string(),
                });
            }
        };

        let defaults = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            pool_size: at_least_one(&var, "WORKER_POOL_SIZE")?.unwrap_or(defaults.pool_size),
            queue_capacity: parse(&var, "DISPATCH_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
        };

        let defaults = PollerConfig::default();
        let poller = PollerConfig {
            batch_size: at_least_one(&var, "RECEIVE_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            min_backoff: parse::<u64>(&var, "POLL_BACKOFF_MIN_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_backoff),
            max_backoff: parse::<u64>(&var, "POLL_BACKOFF_MAX_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
        };
        if poller.min_backoff > poller.max_backoff {
            return Err(ConfigError::Invalid {
                var: "POLL_BACKOFF_MIN_MS",
                value: poller.min_backoff.as_millis().to_string(),
                reason: "must not exceed POLL_BACKOFF_MAX_MS".to_string(),
            });
        }

        let scratch_dir = var("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("ingest"));
        let output_dir = var("OUTPUT_DIR").map(PathBuf::from);

        let compressed_suffix = var("COMPRESSED_SUFFIX").unwrap_or_else(|| ".zst".to_string());

        let job_timeout = match parse::<u64>(&var, "JOB_TIMEOUT_SECS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    var: "JOB_TIMEOUT_SECS",
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            other => other.map(Duration::from_secs),
        };

        let log_level = parse::<Level>(&var, "LOG_LEVEL")?.unwrap_or(Level::INFO);

        Ok(Self {
            queue,
            dispatcher,
            poller,
            scratch_dir,
            output_dir,
            compressed_suffix,
            job_timeout,
            log_level,
        })
    }
}

fn sqs_backend(
    var: &impl Fn(&str) -> Option<String>,
    visibility_timeout: Option<Duration>,
) -> Result<QueueBackend, ConfigError> {
    let queue_url = var("SQS_QUEUE_URL").ok_or(ConfigError::Missing("SQS_QUEUE_URL"))?;
    let mut config = SqsQueueConfig::new(queue_url);
    if let Some(secs) = parse::<u64>(var, "SQS_WAIT_TIME_SECS")? {
        if secs > 20 {
            return Err(ConfigError::Invalid {
                var: "SQS_WAIT_TIME_SECS",
                value: secs.to_string(),
                reason: "SQS allows at most 20 seconds".to_string(),
            });
        }
        config = config.with_wait_time(Duration::from_secs(secs));
    }
    if let Some(timeout) = visibility_timeout {
        config = config.with_visibility_timeout(timeout);
    }
    Ok(QueueBackend::Sqs(config))
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = var(name) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            var: name,
            value,
            reason: e.to_string(),
        })
}

fn at_least_one(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<usize>, ConfigError> {
    match parse::<usize>(var, name)? {
        Some(0) => Err(ConfigError::Invalid {
            var: name,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        }),
        other => Ok(other),
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
