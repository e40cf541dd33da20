//! Pluggable stage implementations.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Stage A: unwrap a fetched container into entries inside `dest_dir`.
pub trait Unwrapper: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Unwrap `source` into `dest_dir` (which already exists) and return the
    /// entries written. Existing entries with the same name are overwritten.
    fn unwrap(&self, source: &Path, dest_dir: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Container format whose payload is the object itself: writes one entry,
/// a byte-for-byte copy named after the fetched file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Unwrapper for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn unwrap(&self, source: &Path, dest_dir: &Path) -> io::Result<Vec<PathBuf>> {
        let name = source.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "source has no file name")
        })?;
        let entry = dest_dir.join(name);

        let mut reader = BufReader::new(File::open(source)?);
        let mut writer = BufWriter::new(File::create(&entry)?);
        io::copy(&mut reader, &mut writer)?;
        writer.flush()?;

        Ok(vec![entry])
    }
}

/// Stage B: decompress one entry.
pub trait Decompressor: Send + Sync + 'static {
    /// File name suffix this decompressor handles, e.g. `.zst`.
    fn suffix(&self) -> &str;

    /// Stream-decompress `reader` into `writer`, returning bytes written.
    fn decompress(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> io::Result<u64>;

    /// Output name for an entry, or `None` if the entry is not handled.
    fn output_name<'a>(&self, entry_name: &'a str) -> Option<&'a str> {
        entry_name.strip_suffix(self.suffix())
    }
}

/// Zstandard decompressor.
#[derive(Debug, Clone)]
pub struct Zstd {
    suffix: String,
}

impl Zstd {
    pub fn new() -> Self {
        Self::with_suffix(".zst")
    }

    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Default for Zstd {
    fn default() -> Self {
        Self::new()
    }
}

impl Decompressor for Zstd {
    fn suffix(&self) -> &str {
        &self.suffix
    }

    fn decompress(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> io::Result<u64> {
        let mut decoder = zstd::stream::read::Decoder::new(reader)?;
        io::copy(&mut decoder, writer)
    }
}
