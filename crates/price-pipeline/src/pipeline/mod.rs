//! Pipeline module.
//!
//! This module provides the ingestion pipeline and its run-state reporting.

mod builder;
pub mod progress;

pub use builder::{Pipeline, PipelineBuilder};
pub use progress::{ClosureProgressReporter, ProgressReporter, ProgressUpdate, RunState};
