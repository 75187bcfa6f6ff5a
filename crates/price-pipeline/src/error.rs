//! Error types for the price ingestion pipeline.
//!
//! Every failure a run can end in is a variant of [`PipelineError`]. Errors
//! serialize as `{ code, message }` so that callers such as a dashboard or a
//! `--json` CLI invocation can present them without parsing display strings.

use crate::types::CleaningSummary;
use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the ingestion pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The tabular source is missing, unreadable, or could not be fetched.
    #[error("Source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// No date-like or price-like column could be resolved.
    #[error("Could not resolve {missing} column(s) from {available:?}")]
    SchemaMismatch {
        missing: String,
        available: Vec<String>,
    },

    /// Every row was discarded during cleaning. Carries the tallies of why.
    #[error("No usable rows after cleaning ({} loaded)", .summary.rows_loaded)]
    NoUsableData { summary: CleaningSummary },

    /// The transactional write was rejected and rolled back.
    #[error("Insert failed, previous table contents kept: {0}")]
    InsertFailure(String),

    /// The relational store could not be reached.
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Another run currently holds the write guard.
    #[error("Another pipeline run is replacing the table")]
    Busy,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A write transaction was opened and then discarded. The previous table
    /// content is intact.
    #[error("Replace rolled back: {source}")]
    RolledBack {
        #[source]
        source: Box<PipelineError>,
    },

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Mark an error as having discarded an open write transaction.
    pub fn rolled_back(self) -> Self {
        match self {
            already @ PipelineError::RolledBack { .. } => already,
            other => PipelineError::RolledBack {
                source: Box::new(other),
            },
        }
    }

    /// Whether the error discarded an open write transaction.
    pub fn is_rolled_back(&self) -> bool {
        match self {
            Self::RolledBack { .. } => true,
            Self::WithContext { source, .. } => source.is_rolled_back(),
            _ => false,
        }
    }

    /// Build a [`PipelineError::SourceUnavailable`] for a named source.
    pub fn source_unavailable(source: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::SourceUnavailable {
            source_name: source.into(),
            reason: reason.to_string(),
        }
    }

    /// Get error code for frontend handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            Self::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            Self::NoUsableData { .. } => "NO_USABLE_DATA",
            Self::InsertFailure(_) => "INSERT_FAILURE",
            Self::SinkUnavailable(_) => "SINK_UNAVAILABLE",
            Self::Busy => "BUSY",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::RolledBack { source } | Self::WithContext { source, .. } => {
                source.error_code()
            }
        }
    }

    /// Whether re-invoking the whole pipeline later may succeed without
    /// changing its inputs.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy | Self::SinkUnavailable(_) => true,
            Self::RolledBack { source } | Self::WithContext { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }

    /// The innermost error, skipping any context wrappers.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::RolledBack { source } | Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Polars(e).with_context(context))
    }
}
