//! Pipeline errors.

use std::path::PathBuf;

/// A single stage B entry that could not be decompressed.
#[derive(Debug)]
pub struct EntryFailure {
    pub entry: PathBuf,
    pub error: std::io::Error,
}

impl std::fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.entry.display(), self.error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("workspace I/O error: {0}")]
    Workspace(std::io::Error),

    #[error("unwrap of {path} failed: {source}")]
    Unwrap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{count} of {total} entries failed to decompress", count = .failed.len())]
    Entries {
        total: usize,
        failed: Vec<EntryFailure>,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot publish {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output {0} has no file name")]
    NoFileName(PathBuf),
}
