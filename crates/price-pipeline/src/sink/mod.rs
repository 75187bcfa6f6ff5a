//! Relational sink for cleaned price tables.
//!
//! A sink owns the target table: it creates it when missing and replaces its
//! whole content in a single transaction. Two backends share the same
//! contract:
//!
//! - [`MySqlSink`] - the production store
//! - [`SqliteSink`] - a file or in-memory database for local runs and tests
//!
//! Both connect lazily, so an unreachable store surfaces as
//! [`PipelineError::SinkUnavailable`] from the first operation rather than
//! from construction.

mod mysql;
mod sqlite;

pub use mysql::MySqlSink;
pub use sqlite::SqliteSink;

use crate::config::{SinkBackend, SinkConfig};
use crate::error::{PipelineError, Result};
use crate::types::{PriceTable, SinkStats, StoredPrice};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Destination of a pipeline run.
#[async_trait]
pub trait PriceSink: Send + Sync {
    /// Human-readable target, without credentials.
    fn describe(&self) -> String;

    /// Create the target table and its indexes if they do not exist.
    /// Existing rows and structure are never touched.
    async fn ensure_schema(&self) -> Result<()>;

    /// Atomically replace the table content with `table`.
    ///
    /// Either every row of `table` is committed and nothing else remains, or
    /// the previous content is left as it was. Returns the number of rows
    /// written.
    ///
    /// A failure after the write transaction was opened is returned marked
    /// with [`PipelineError::rolled_back`]; a failure before that (busy guard,
    /// no connection) is returned unmarked.
    async fn replace_all(&self, table: &PriceTable) -> Result<usize>;

    /// Stored rows, newest date first.
    async fn query(&self, limit: Option<usize>) -> Result<Vec<StoredPrice>>;

    /// Aggregate figures over the stored rows.
    async fn stats(&self) -> Result<SinkStats>;
}

/// Build the sink selected by `config`.
///
/// No connection is opened here; see the module docs. Must be called from
/// within a Tokio runtime, since the pool spawns its maintenance task.
pub fn connect_sink(config: &SinkConfig, insert_batch_size: usize) -> Result<Arc<dyn PriceSink>> {
    config
        .validate()
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

    info!("Using sink {}", config.describe());

    let sink: Arc<dyn PriceSink> = match &config.backend {
        SinkBackend::MySql(_) => Arc::new(MySqlSink::new(config, insert_batch_size)?),
        SinkBackend::Sqlite { .. } => Arc::new(SqliteSink::new(config, insert_batch_size)?),
    };
    Ok(sink)
}

// =============================================================================
// Error classification
// =============================================================================

/// Whether an sqlx error means the store could not be reached at all.
pub(crate) fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_)
    )
}

/// Any failure outside the write transaction means the store is unusable.
pub(crate) fn unavailable(err: sqlx::Error) -> PipelineError {
    PipelineError::SinkUnavailable(err.to_string())
}

/// Failures inside the write transaction are insert failures unless the
/// connection itself went away.
pub(crate) fn insert_failure(err: sqlx::Error) -> PipelineError {
    if is_connection_error(&err) {
        unavailable(err)
    } else {
        PipelineError::InsertFailure(err.to_string())
    }
}

/// Roll back after a failed write. The returned error is marked as rolled
/// back and keeps the original classification.
pub(crate) async fn rollback_with<DB: sqlx::Database>(
    tx: sqlx::Transaction<'_, DB>,
    err: PipelineError,
) -> PipelineError {
    if let Err(rollback_err) = tx.rollback().await {
        warn!("Rollback failed: {}", rollback_err);
    }
    warn!("Replace rolled back: {}", err);
    err.rolled_back()
}

/// A failed commit discards the transaction.
pub(crate) fn commit_failure(err: sqlx::Error) -> PipelineError {
    insert_failure(err).rolled_back()
}

// =============================================================================
// Shared SQL helpers
// =============================================================================

/// Quote a string literal for DDL. Only used with validated configuration
/// values; row data is always bound.
pub(crate) fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Stats over rows read back from either backend.
pub(crate) fn stats_from_rows(rows: &[StoredPrice]) -> SinkStats {
    if rows.is_empty() {
        return SinkStats::default();
    }

    let total: f64 = rows.iter().map(|r| r.price).sum();
    SinkStats {
        total_records: rows.len() as u64,
        first_date: rows.iter().map(|r| r.date).min(),
        last_date: rows.iter().map(|r| r.date).max(),
        average_price: Some(total / rows.len() as f64),
    }
}
