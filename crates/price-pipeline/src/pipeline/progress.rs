//! Run states and progress reporting for the ingestion pipeline.
//!
//! A run walks through [`RunState`]s in order and reports every transition
//! to an optional [`ProgressReporter`], e.g. a dashboard refreshing its
//! status line.
//!
//! # Example
//!
//! ```rust,ignore
//! use price_pipeline::Pipeline;
//!
//! let result = Pipeline::builder()
//!     .sink(sink)
//!     .on_progress(|update| {
//!         println!("[{:?}] {}", update.state, update.message);
//!     })
//!     .build()?
//!     .run(&source)
//!     .await;
//! ```

use serde::{Deserialize, Serialize};

/// States of a pipeline run.
///
/// `Committed`, `RolledBack` and `Aborted` are terminal. A run is `RolledBack`
/// when its write transaction failed and `Aborted` when it stopped before
/// the transaction began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started
    Idle,
    /// Reading the source
    Loading,
    /// Resolving columns and normalizing rows
    Cleaning,
    /// Target table exists
    SchemaEnsured,
    /// Write transaction open
    Replacing,
    /// New content committed
    Committed,
    /// Write transaction rolled back, previous content kept
    RolledBack,
    /// Stopped before writing
    Aborted,
}

impl RunState {
    /// Returns a human-readable name for the state.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Loading => "Loading Source",
            Self::Cleaning => "Cleaning Data",
            Self::SchemaEnsured => "Schema Ready",
            Self::Replacing => "Replacing Table",
            Self::Committed => "Committed",
            Self::RolledBack => "Rolled Back",
            Self::Aborted => "Aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Aborted)
    }

    /// Approximate overall progress on entering this state (0.0 - 1.0).
    pub fn progress(&self) -> f32 {
        match self {
            Self::Idle => 0.0,
            Self::Loading => 0.05,
            Self::Cleaning => 0.35,
            Self::SchemaEnsured => 0.55,
            Self::Replacing => 0.65,
            Self::Committed => 1.0,
            Self::RolledBack | Self::Aborted => 0.0,
        }
    }
}

/// A state transition as seen by observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// State just entered
    pub state: RunState,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Human-readable message describing current activity
    pub message: String,

    /// Row count relevant to the state (loaded, retained or written)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
}

impl ProgressUpdate {
    pub fn new(state: RunState, message: impl Into<String>) -> Self {
        Self {
            state,
            progress: state.progress(),
            message: message.into(),
            rows: None,
        }
    }

    pub fn with_rows(state: RunState, rows: usize, message: impl Into<String>) -> Self {
        Self {
            rows: Some(rows),
            ..Self::new(state, message)
        }
    }
}

/// Trait for receiving progress updates during a run.
///
/// Implementations must be `Send + Sync`; the run may execute on any worker
/// thread of the runtime.
pub trait ProgressReporter: Send + Sync {
    /// Called on every state transition. Must not block.
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    /// Creates a new closure-based progress reporter.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);
static_assertions::assert_impl_all!(RunState: Send, Sync, Copy);
