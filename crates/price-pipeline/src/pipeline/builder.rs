//! Main ingestion pipeline module.
//!
//! This module provides the core `Pipeline` struct and builder for
//! orchestrating a load, clean and replace run.

use crate::cleaner::PriceCleaner;
use crate::config::{ConfigValidationError, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::loader::{CsvLoader, SourceLocation};
use crate::pipeline::progress::{
    ClosureProgressReporter, ProgressReporter, ProgressUpdate, RunState,
};
use crate::sink::PriceSink;
use crate::types::{CleaningSummary, PipelineResult, ResolvedColumns};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// The main ingestion pipeline.
///
/// Use [`Pipeline::builder()`] to create a new pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use price_pipeline::{Pipeline, PipelineConfig, SinkConfig, SourceLocation, connect_sink};
///
/// let config = PipelineConfig::default();
/// let sink = connect_sink(&SinkConfig::from_env()?, config.insert_batch_size)?;
///
/// let result = Pipeline::builder()
///     .config(config)
///     .sink(sink)
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .run(&SourceLocation::parse("data/Electric_prices.csv"))
///     .await;
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    loader: CsvLoader,
    cleaner: PriceCleaner,
    sink: Arc<dyn PriceSink>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

// Runs are spawned onto the runtime and may be shared between handlers.
static_assertions::assert_impl_all!(Pipeline: Send, Sync);

/// What a run has produced so far.
#[derive(Debug)]
struct RunTracker {
    state: RunState,
    columns: Option<ResolvedColumns>,
    summary: Option<CleaningSummary>,
    rows_written: usize,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            columns: None,
            summary: None,
            rows_written: 0,
        }
    }
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn PriceSink> {
        &self.sink
    }

    /// Run the pipeline once against `source`.
    ///
    /// Never fails; the outcome, including any error, is described by the
    /// returned [`PipelineResult`]. The sink's table is either fully replaced
    /// (`Committed`) or left exactly as it was.
    pub async fn run(&self, source: &SourceLocation) -> PipelineResult {
        let start_time = Instant::now();
        let mut run = RunTracker::default();

        info!("Starting pipeline run for {}", source);
        let outcome = self.run_stages(source, &mut run).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                let rows_written = run.rows_written;
                let message = format!(
                    "Replaced {} with {} rows",
                    self.sink.describe(),
                    rows_written
                );
                self.enter(&mut run, RunState::Committed, Some(rows_written), &message);
                info!("Pipeline completed in {} ms", duration_ms);

                PipelineResult {
                    success: true,
                    message: Some(message),
                    error: None,
                    state: run.state,
                    columns: run.columns,
                    summary: run.summary,
                    rows_written: run.rows_written,
                    duration_ms,
                }
            }
            Err(e) => {
                let terminal = terminal_state_for(run.state, &e);
                self.enter(&mut run, terminal, None, &e.to_string());
                error!("Pipeline error: {}", e);

                PipelineResult {
                    success: false,
                    message: Some(e.to_string()),
                    error: Some(e),
                    state: run.state,
                    columns: run.columns,
                    summary: run.summary,
                    rows_written: 0,
                    duration_ms,
                }
            }
        }
    }

    /// Like [`run`](Self::run), but surfaces a failure as `Err`.
    pub async fn execute(&self, source: &SourceLocation) -> Result<PipelineResult> {
        let mut result = self.run(source).await;
        match result.error.take() {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    async fn run_stages(&self, source: &SourceLocation, run: &mut RunTracker) -> Result<()> {
        // Step 1: Load
        self.enter(run, RunState::Loading, None, &format!("Loading {}", source));
        let raw = self.loader.load(source).await?;

        // Step 2: Clean
        self.enter(
            run,
            RunState::Cleaning,
            Some(raw.height()),
            &format!("Cleaning {} rows", raw.height()),
        );
        let batch = match self.cleaner.clean(&raw) {
            Ok(batch) => batch,
            Err(e) => {
                if let PipelineError::NoUsableData { summary } = e.root() {
                    run.summary = Some(summary.clone());
                }
                return Err(e);
            }
        };
        let retained = batch.table.len();
        run.columns = Some(batch.columns);
        run.summary = Some(batch.summary);

        // Step 3: Schema
        self.sink.ensure_schema().await?;
        self.enter(run, RunState::SchemaEnsured, None, "Target table ready");

        // Step 4: Replace
        self.enter(
            run,
            RunState::Replacing,
            Some(retained),
            &format!("Writing {} rows", retained),
        );
        run.rows_written = self.sink.replace_all(&batch.table).await?;

        Ok(())
    }

    fn enter(&self, run: &mut RunTracker, state: RunState, rows: Option<usize>, message: &str) {
        debug!("{:?} -> {:?}", run.state, state);
        run.state = state;
        let update = match rows {
            Some(rows) => ProgressUpdate::with_rows(state, rows, message),
            None => ProgressUpdate::new(state, message),
        };
        self.report_progress(update);
    }

    /// Report progress if a reporter is configured.
    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }
}

/// Where a failed run ends up. `RolledBack` only when the sink had opened its
/// write transaction; a refused or unconnectable write never started one.
fn terminal_state_for(state: RunState, err: &PipelineError) -> RunState {
    let transaction_discarded =
        err.is_rolled_back() || matches!(err.root(), PipelineError::InsertFailure(_));

    match state {
        RunState::Replacing if transaction_discarded => RunState::RolledBack,
        _ => RunState::Aborted,
    }
}

/// Builder for creating a [`Pipeline`] instance.
///
/// Use [`Pipeline::builder()`] to get started. A sink is required.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    sink: Option<Arc<dyn PriceSink>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the sink the pipeline writes to.
    ///
    /// The sink is shared: several pipelines holding the same `Arc` contend
    /// for the same write guard.
    pub fn sink(mut self, sink: Arc<dyn PriceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set a progress reporter for receiving state transitions.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// This is a convenience method for simple progress handling.
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid or no sink was set.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let sink = self.sink.ok_or(ConfigValidationError::MissingSink)?;

        Ok(Pipeline {
            loader: CsvLoader::new(&config),
            cleaner: PriceCleaner::from_config(&config),
            config,
            sink,
            progress_reporter: self.progress_reporter,
        })
    }
}
