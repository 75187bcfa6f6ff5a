//! Electricity Price Ingestion Pipeline
//!
//! Loads a tabular electricity price dataset, normalizes it into a canonical
//! `(date, price, area)` schema, and replaces the content of a relational
//! table with the result in one transaction.
//!
//! # Overview
//!
//! A run has three stages, each short-circuiting on failure:
//!
//! - **Loading**: delimited files on disk or over HTTP, every column as text
//! - **Cleaning**: column resolution by name, date and price parsing, area
//!   defaulting and de-duplication
//! - **Sink**: idempotent schema creation and an atomic replace-all into
//!   MySQL or SQLite
//!
//! The stored table is never left half-written: a run either commits the
//! complete cleaned table or leaves the previous content untouched.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use price_pipeline::{Pipeline, PipelineConfig, SinkConfig, SourceLocation, connect_sink};
//!
//! let config = PipelineConfig::default();
//! let sink = connect_sink(&SinkConfig::from_env()?, config.insert_batch_size)?;
//!
//! let result = Pipeline::builder()
//!     .config(config)
//!     .sink(sink)
//!     .build()?
//!     .run(&SourceLocation::parse("data/Electric_prices.csv"))
//!     .await;
//!
//! if result.success {
//!     println!("Wrote {} rows", result.rows_written);
//! } else {
//!     println!("Run failed: {:?}", result.error);
//! }
//! ```
//!
//! # Configuration
//!
//! Pipeline behavior is set through [`PipelineConfig`]; the target store
//! through [`SinkConfig`], usually read from `DB_*` environment variables:
//!
//! ```rust,ignore
//! use price_pipeline::PipelineConfig;
//!
//! let config = PipelineConfig::builder()
//!     .separator(b';')
//!     .default_area("SE3")
//!     .source_timeout_secs(10)
//!     .insert_batch_size(1000)
//!     .build()?;
//! ```
//!
//! # Reporting
//!
//! The [`reporting`] module reads the stored table back for dashboards,
//! with an explicit flat-file fallback when the store is down.

pub mod cleaner;
pub mod config;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod reporting;
pub mod sink;
pub mod types;
pub mod utils;

// Re-exports for convenient access
pub use cleaner::{CleanedBatch, PriceCleaner, require_columns, resolve_columns};
pub use config::{
    ConfigValidationError, MySqlSettings, PipelineConfig, PipelineConfigBuilder, SinkBackend,
    SinkConfig,
};
pub use error::{PipelineError, Result as PriceResult, ResultExt};
pub use loader::{CsvLoader, RawRecord, RawTable, SampleGenerator, SourceLocation, write_sample_csv};
pub use pipeline::{
    ClosureProgressReporter, Pipeline, PipelineBuilder, ProgressReporter, ProgressUpdate, RunState,
};
pub use reporting::{
    DataOrigin, FlatFileFallback, MonthlyAverage, PriceStats, ReportData, load_report_data,
};
pub use sink::{MySqlSink, PriceSink, SqliteSink, connect_sink};
pub use types::{
    CanonicalRecord, CleaningSummary, PipelineResult, PriceTable, ResolvedColumns, SinkStats,
    StoredPrice,
};
pub use utils::{is_missing_marker, normalize_column_name, parse_date, parse_price};
