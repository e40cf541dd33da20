//! Extraction pipeline for fetched objects.
//!
//! # Architecture
//!
//! - `Workspace` - exclusively-owned scratch directory, removed on drop
//! - `Unwrapper` (stage A) - unwraps the fetched container into entries
//! - `Decompressor` (stage B) - decompresses entries with a known suffix
//! - `Pipeline` - runs stage A then stage B inside a workspace
//! - `OutputSink` - receives final outputs before the workspace is removed
//!
//! Every stage is synchronous and streaming; callers on an async runtime
//! should run the pipeline on a blocking thread.

mod error;
mod extract;
mod sink;
mod stage;
mod workspace;

pub use error::{EntryFailure, PipelineError, SinkError};
pub use extract::{ExtractionReport, Pipeline};
pub use sink::{LocalDirSink, OutputSink};
pub use stage::{Decompressor, Passthrough, Unwrapper, Zstd};
pub use workspace::Workspace;
