//! Per-job scratch directories.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const UNWRAP_DIR: &str = "unwrapped";
const DECOMPRESS_DIR: &str = "decompressed";

/// A uniquely named scratch directory tree owned by exactly one job.
///
/// All paths derive from a single root. The tree is removed when the
/// workspace is dropped, on every exit path; [`Workspace::close`] does the
/// same but reports the removal error.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `scratch_root`, creating the root if needed.
    pub fn create_in(scratch_root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(scratch_root)?;
        let dir = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(scratch_root)?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Where the fetched object is stored, under its original file name.
    ///
    /// Names that would escape the workspace are rejected.
    pub fn download_path(&self, file_name: &str) -> io::Result<PathBuf> {
        let name = Path::new(file_name);
        let is_plain = name.file_name().is_some_and(|n| n == name.as_os_str());
        if !is_plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{file_name}` is not a plain file name"),
            ));
        }
        Ok(self.root().join(name))
    }

    /// Stage A output directory.
    pub fn unwrap_dir(&self) -> PathBuf {
        self.root().join(UNWRAP_DIR)
    }

    /// Stage B output directory.
    pub fn decompress_dir(&self) -> PathBuf {
        self.root().join(DECOMPRESS_DIR)
    }

    /// Remove the tree now, reporting failures.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}
