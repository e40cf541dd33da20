//! Two-stage extraction run inside a workspace.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{EntryFailure, PipelineError};
use crate::stage::{Decompressor, Passthrough, Unwrapper, Zstd};
use crate::workspace::Workspace;

/// What a successful pipeline run produced, all inside the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Stage A entries.
    pub unwrapped: Vec<PathBuf>,
    /// Stage B outputs, in entry name order.
    pub decompressed: Vec<PathBuf>,
    /// Stage A entries without the compressed suffix, left untouched.
    pub skipped: Vec<PathBuf>,
}

/// Stage A followed by stage B.
pub struct Pipeline {
    unwrapper: Box<dyn Unwrapper>,
    decompressor: Box<dyn Decompressor>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Passthrough, Zstd::new())
    }
}

impl Pipeline {
    pub fn new(unwrapper: impl Unwrapper, decompressor: impl Decompressor) -> Self {
        Self {
            unwrapper: Box::new(unwrapper),
            decompressor: Box::new(decompressor),
        }
    }

    pub fn suffix(&self) -> &str {
        self.decompressor.suffix()
    }

    /// Run both stages against `fetched` inside `workspace`.
    ///
    /// Stage B keeps going after an entry fails; any failed entry makes the
    /// whole run an error.
    pub fn run(&self, workspace: &Workspace, fetched: &Path) -> Result<ExtractionReport, PipelineError> {
        let unwrap_dir = workspace.unwrap_dir();
        std::fs::create_dir_all(&unwrap_dir).map_err(PipelineError::Workspace)?;

        let unwrapped = self
            .unwrapper
            .unwrap(fetched, &unwrap_dir)
            .map_err(|source| PipelineError::Unwrap {
                path: fetched.to_path_buf(),
                source,
            })?;
        tracing::debug!(
            unwrapper = self.unwrapper.name(),
            entries = unwrapped.len(),
            "Stage A complete"
        );

        let (decompressed, skipped) = self.decompress_all(&unwrap_dir, &workspace.decompress_dir())?;

        Ok(ExtractionReport {
            unwrapped,
            decompressed,
            skipped,
        })
    }

    fn decompress_all(
        &self,
        source_dir: &Path,
        dest_dir: &Path,
    ) -> Result<(Vec<PathBuf>, Vec<PathBuf>), PipelineError> {
        let scan_err = |source| PipelineError::Scan {
            path: source_dir.to_path_buf(),
            source,
        };
        let mut entries = std::fs::read_dir(source_dir)
            .map_err(scan_err)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(scan_err)?;
        entries.sort();

        let mut decompressed = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        let mut matched = 0usize;

        for entry in entries {
            if !entry.is_file() {
                continue;
            }
            let Some(output_name) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| self.decompressor.output_name(n))
                .map(str::to_owned)
            else {
                skipped.push(entry);
                continue;
            };
            matched += 1;

            match self.decompress_entry(&entry, dest_dir, &output_name) {
                Ok(output) => decompressed.push(output),
                Err(error) => {
                    tracing::error!(entry = %entry.display(), %error, "Failed to decompress entry");
                    failed.push(EntryFailure { entry, error });
                }
            }
        }

        if !failed.is_empty() {
            return Err(PipelineError::Entries {
                total: matched,
                failed,
            });
        }
        Ok((decompressed, skipped))
    }

    fn decompress_entry(&self, entry: &Path, dest_dir: &Path, output_name: &str) -> io::Result<PathBuf> {
        if output_name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "entry name is only the compressed suffix",
            ));
        }
        std::fs::create_dir_all(dest_dir)?;
        let output = dest_dir.join(output_name);

        let mut reader = BufReader::new(File::open(entry)?);
        let mut writer = BufWriter::new(File::create(&output)?);
        let bytes = self.decompressor.decompress(&mut reader, &mut writer)?;
        writer.flush()?;

        tracing::debug!(output = %output.display(), bytes, "Decompressed entry");
        Ok(output)
    }
}
