//! Handoff of final outputs before the workspace is removed.

use std::fs::File;
use std::path::{Path, PathBuf};

use ingest_core::JobTimestamp;

use crate::error::SinkError;

/// Receives a job's final outputs while they still exist in its workspace.
///
/// Called only after every stage succeeded. Publishing the same outputs
/// twice must leave the same result as publishing once.
pub trait OutputSink: Send + Sync + 'static {
    fn publish(&self, timestamp: &JobTimestamp, files: &[PathBuf]) -> Result<Vec<PathBuf>, SinkError>;
}

/// Copies outputs to `<root>/<timestamp>/<file name>`.
///
/// Each file is copied into a uniquely named temporary sibling and renamed
/// into place, so a reader never sees a partial file and concurrent or
/// redelivered jobs publishing the same name each land a whole file.
#[derive(Debug, Clone)]
pub struct LocalDirSink {
    root: PathBuf,
}

impl LocalDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn publish_one(&self, dir: &Path, file: &Path) -> Result<PathBuf, SinkError> {
        let name = file
            .file_name()
            .ok_or_else(|| SinkError::NoFileName(file.to_path_buf()))?;
        let target = dir.join(name);

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| SinkError::Io { path, source }
        };
        let mut source = File::open(file).map_err(io_err(file))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".publish-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(io_err(dir))?;
        std::io::copy(&mut source, temp.as_file_mut()).map_err(io_err(temp.path()))?;
        temp.as_file().sync_all().map_err(io_err(temp.path()))?;
        temp.persist(&target).map_err(|e| io_err(&target)(e.error))?;

        Ok(target)
    }
}

impl OutputSink for LocalDirSink {
    fn publish(&self, timestamp: &JobTimestamp, files: &[PathBuf]) -> Result<Vec<PathBuf>, SinkError> {
        let dir = self.root.join(timestamp.as_str());
        std::fs::create_dir_all(&dir).map_err(|source| SinkError::Io {
            path: dir.clone(),
            source,
        })?;

        let published = files
            .iter()
            .map(|file| self.publish_one(&dir, file))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(dir = %dir.display(), files = published.len(), "Published outputs");
        Ok(published)
    }
}
