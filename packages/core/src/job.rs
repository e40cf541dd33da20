//! Job domain types for the unit of work derived from one notification.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
///
/// A job id is local to one processing attempt; redeliveries of the same
/// notification get a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

static TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2}").expect("timestamp pattern is valid")
});

/// Logical timestamp of a job, taken from its object key's file name.
///
/// The matched text is kept verbatim so downstream grouping uses exactly
/// what the producer wrote. Any digits in the pattern are accepted; the
/// calendar reading is only available when the text is a real date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobTimestamp {
    raw: String,
    at: Option<NaiveDateTime>,
}

impl JobTimestamp {
    /// Extract the first `YYYY-MM-DD-HH-MM-SS` substring of the key's final
    /// path segment.
    pub fn from_key(key: &str) -> Result<Self, TimestampError> {
        let file_name = key.rsplit('/').next().unwrap_or_default();
        let found = TIMESTAMP_PATTERN
            .find(file_name)
            .ok_or_else(|| TimestampError::Missing(key.to_string()))?;

        let raw = found.as_str();
        let at = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok();

        Ok(Self {
            raw: raw.to_string(),
            at,
        })
    }

    /// The substring exactly as it appeared in the key.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed calendar time (no timezone is implied by the key), if the
    /// matched text is a valid date.
    pub fn at(&self) -> Option<NaiveDateTime> {
        self.at
    }
}

impl std::fmt::Display for JobTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Errors deriving a job timestamp from an object key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    #[error("no timestamp in object key `{0}`")]
    Missing(String),
}
