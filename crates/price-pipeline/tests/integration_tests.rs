//! Integration tests for the price ingestion pipeline.
//!
//! These tests verify end-to-end behavior against CSV fixtures and an
//! in-memory SQLite sink.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use price_pipeline::{
    CanonicalRecord, CsvLoader, DataOrigin, FlatFileFallback, MySqlSettings, Pipeline,
    PipelineConfig, PipelineError, PriceCleaner, PriceSink, PriceTable, RunState,
    SampleGenerator, SinkConfig, SinkStats, SourceLocation, StoredPrice, connect_sink,
    load_report_data, resolve_columns, write_sample_csv,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(filename: &str) -> SourceLocation {
    SourceLocation::File(fixtures_path().join(filename))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn memory_sink() -> Arc<dyn PriceSink> {
    connect_sink(&SinkConfig::sqlite_in_memory(), 500).expect("in-memory sink")
}

fn pipeline(sink: Arc<dyn PriceSink>) -> Pipeline {
    Pipeline::builder().sink(sink).build().unwrap()
}

fn clean_fixture(filename: &str) -> price_pipeline::CleanedBatch {
    let raw = CsvLoader::default()
        .load_file(&fixtures_path().join(filename))
        .expect("Failed to read fixture");
    PriceCleaner::default()
        .clean(&raw)
        .expect("Failed to clean fixture")
}

/// Stored content without storage-only fields, oldest first.
async fn stored_content(sink: &dyn PriceSink) -> Vec<(NaiveDate, f64, Option<String>)> {
    let mut rows: Vec<_> = sink
        .query(None)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.date, r.price, r.area))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    rows
}

/// How the sink double's `replace_all` fails.
#[derive(Debug, Clone, Copy)]
enum ReplaceFailure {
    /// No connection could be taken; no transaction was opened.
    Refused,
    /// A statement was rejected and the transaction rolled back.
    Rejected,
    /// The connection dropped while the transaction was open.
    ConnectionLost,
}

impl ReplaceFailure {
    fn error(self) -> PipelineError {
        match self {
            Self::Refused => PipelineError::SinkUnavailable("pool timed out".to_string()),
            Self::Rejected => {
                PipelineError::InsertFailure("constraint violated".to_string()).rolled_back()
            }
            Self::ConnectionLost => {
                PipelineError::SinkUnavailable("connection reset".to_string()).rolled_back()
            }
        }
    }
}

/// Sink double that records calls and fails on demand.
#[derive(Default)]
struct RecordingSink {
    fail_schema: bool,
    replace_failure: Option<ReplaceFailure>,
    schema_calls: AtomicUsize,
    replace_calls: AtomicUsize,
}

impl RecordingSink {
    fn failing_replace(failure: ReplaceFailure) -> Arc<Self> {
        Arc::new(Self {
            replace_failure: Some(failure),
            ..Self::default()
        })
    }
}

#[async_trait]
impl PriceSink for RecordingSink {
    fn describe(&self) -> String {
        "recording".to_string()
    }

    async fn ensure_schema(&self) -> price_pipeline::PriceResult<()> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_schema {
            return Err(PipelineError::SinkUnavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn replace_all(&self, table: &PriceTable) -> price_pipeline::PriceResult<usize> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.replace_failure {
            return Err(failure.error());
        }
        Ok(table.len())
    }

    async fn query(&self, _limit: Option<usize>) -> price_pipeline::PriceResult<Vec<StoredPrice>> {
        Ok(Vec::new())
    }

    async fn stats(&self) -> price_pipeline::PriceResult<SinkStats> {
        Ok(SinkStats::default())
    }
}

// ============================================================================
// Cleaning Properties
// ============================================================================

#[test]
fn test_every_record_has_date_and_finite_price() {
    for filename in [
        "messy_prices.csv",
        "canonical_prices.csv",
        "hourly_spot.csv",
        "area_duplicates.csv",
    ] {
        let batch = clean_fixture(filename);
        assert!(!batch.table.is_empty(), "{} produced no rows", filename);
        for record in batch.table.records() {
            assert!(record.price.is_finite(), "{}: {:?}", filename, record);
            assert!(!record.area.is_empty(), "{}: {:?}", filename, record);
        }
    }
}

#[test]
fn test_canonical_input_round_trips() {
    let batch = clean_fixture("canonical_prices.csv");

    let expected = vec![
        CanonicalRecord::new(date(2024, 3, 1), 52.10, "Finland"),
        CanonicalRecord::new(date(2024, 3, 2), 48.75, "Finland"),
        CanonicalRecord::new(date(2024, 3, 3), -1.25, "Finland"),
        CanonicalRecord::new(date(2024, 3, 4), 0.0, "Finland"),
        CanonicalRecord::new(date(2024, 3, 5), 61.40, "Finland"),
    ];
    assert_eq!(batch.table.records(), expected.as_slice());
    assert_eq!(batch.summary.rows_loaded, 5);
    assert_eq!(batch.summary.rows_dropped(), 0);
}

#[test]
fn test_duplicate_rule() {
    let batch = clean_fixture("area_duplicates.csv");

    assert_eq!(
        batch.table.records(),
        &[
            CanonicalRecord::new(date(2024, 1, 1), 30.0, "SE1"),
            CanonicalRecord::new(date(2024, 1, 1), 31.0, "SE3"),
            CanonicalRecord::new(date(2024, 1, 2), 29.0, "Finland"),
        ]
    );
    assert_eq!(batch.summary.duplicates_removed, 1);
    assert_eq!(batch.summary.areas_defaulted, 1);
}

#[test]
fn test_hourly_source_tallies() {
    let batch = clean_fixture("hourly_spot.csv");

    assert_eq!(batch.columns.date, "Timestamp");
    assert_eq!(batch.columns.price, "EUR_MWH");
    assert_eq!(batch.columns.area, None);
    assert_eq!(batch.summary.rows_loaded, 6);
    assert_eq!(batch.summary.dropped_bad_date, 1);
    assert_eq!(batch.summary.dropped_bad_price, 1);
    assert_eq!(batch.summary.duplicates_removed, 1);
    assert_eq!(batch.summary.rows_retained, 3);
    assert_eq!(batch.table.prices(), vec![40.0, 38.5, 44.25]);
}

#[test]
fn test_column_resolution() {
    let resolved = resolve_columns(&["Timestamp", "EUR_MWH"]).unwrap();
    assert_eq!(resolved.date, "Timestamp");
    assert_eq!(resolved.price, "EUR_MWH");

    assert!(resolve_columns(&["foo", "bar"]).is_none());
}

// ============================================================================
// Full Pipeline Tests
// ============================================================================

#[tokio::test]
async fn test_messy_scenario_stores_one_record() {
    let sink = memory_sink();
    let result = pipeline(sink.clone()).run(&fixture("messy_prices.csv")).await;

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.state, RunState::Committed);
    assert_eq!(result.rows_written, 1);
    assert_eq!(
        stored_content(sink.as_ref()).await,
        vec![(date(2024, 1, 1), 45.5, Some("Finland".to_string()))]
    );
}

#[tokio::test]
async fn test_unresolvable_columns_fail_with_schema_mismatch() {
    let sink = memory_sink();
    let result = pipeline(sink).run(&fixture("no_price_columns.csv")).await;

    assert!(!result.success);
    assert_eq!(result.state, RunState::Aborted);
    assert!(matches!(
        result.error,
        Some(PipelineError::SchemaMismatch { .. })
    ));
}

#[tokio::test]
async fn test_replace_all_twice_is_idempotent() {
    let sink = memory_sink();
    let pipeline = pipeline(sink.clone());

    pipeline.execute(&fixture("canonical_prices.csv")).await.unwrap();
    let once = stored_content(sink.as_ref()).await;

    pipeline.execute(&fixture("canonical_prices.csv")).await.unwrap();
    let twice = stored_content(sink.as_ref()).await;

    assert_eq!(once.len(), 5);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_new_run_replaces_previous_content() {
    let sink = memory_sink();
    let pipeline = pipeline(sink.clone());

    pipeline.execute(&fixture("canonical_prices.csv")).await.unwrap();
    pipeline.execute(&fixture("area_duplicates.csv")).await.unwrap();

    let content = stored_content(sink.as_ref()).await;
    assert_eq!(content.len(), 3);
    assert!(content.iter().all(|(d, _, _)| d.month() == 1));
}

#[tokio::test]
async fn test_no_usable_data_leaves_table_unchanged() {
    let sink = memory_sink();
    let pipeline = pipeline(sink.clone());

    pipeline.execute(&fixture("canonical_prices.csv")).await.unwrap();
    let before = stored_content(sink.as_ref()).await;

    let result = pipeline.run(&fixture("all_invalid.csv")).await;

    assert!(!result.success);
    assert_eq!(result.error_code(), Some("NO_USABLE_DATA"));
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(stored_content(sink.as_ref()).await, before);
}

#[tokio::test]
async fn test_sink_unavailable_performs_no_writes() {
    let sink = Arc::new(RecordingSink {
        fail_schema: true,
        ..RecordingSink::default()
    });
    let result = pipeline(sink.clone()).run(&fixture("canonical_prices.csv")).await;

    assert!(!result.success);
    assert_eq!(result.error_code(), Some("SINK_UNAVAILABLE"));
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(sink.schema_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.replace_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_mysql_is_sink_unavailable() {
    let config = SinkConfig::mysql(MySqlSettings {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..MySqlSettings::default()
    })
    .with_connect_timeout_secs(1);
    let sink = connect_sink(&config, 500).unwrap();

    let result = pipeline(sink).run(&fixture("canonical_prices.csv")).await;

    assert_eq!(result.error_code(), Some("SINK_UNAVAILABLE"));
    assert_eq!(result.rows_written, 0);
    assert!(result.error.as_ref().unwrap().is_retryable());
}

#[tokio::test]
async fn test_insert_failure_ends_rolled_back() {
    let sink = RecordingSink::failing_replace(ReplaceFailure::Rejected);
    let result = pipeline(sink.clone()).run(&fixture("canonical_prices.csv")).await;

    assert_eq!(result.error_code(), Some("INSERT_FAILURE"));
    assert_eq!(result.state, RunState::RolledBack);
    assert_eq!(result.rows_written, 0);
    assert_eq!(sink.replace_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_refused_before_write_ends_aborted() {
    let sink = RecordingSink::failing_replace(ReplaceFailure::Refused);
    let result = pipeline(sink.clone()).run(&fixture("canonical_prices.csv")).await;

    assert_eq!(result.error_code(), Some("SINK_UNAVAILABLE"));
    assert_eq!(result.state, RunState::Aborted);
    assert_eq!(result.rows_written, 0);
    assert_eq!(sink.schema_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.replace_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_lost_during_write_ends_rolled_back() {
    let sink = RecordingSink::failing_replace(ReplaceFailure::ConnectionLost);
    let result = pipeline(sink).run(&fixture("canonical_prices.csv")).await;

    assert_eq!(result.error_code(), Some("SINK_UNAVAILABLE"));
    assert_eq!(result.state, RunState::RolledBack);
    assert!(result.error.as_ref().unwrap().is_retryable());
}

#[tokio::test]
async fn test_missing_source_is_source_unavailable() {
    let sink = Arc::new(RecordingSink::default());
    let result = pipeline(sink.clone()).run(&fixture("does_not_exist.csv")).await;

    assert_eq!(result.error_code(), Some("SOURCE_UNAVAILABLE"));
    assert_eq!(sink.schema_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_semicolon_separated_source() {
    let sink = memory_sink();
    let config = PipelineConfig::builder().separator(b';').build().unwrap();
    let pipeline = Pipeline::builder()
        .config(config)
        .sink(sink.clone())
        .build()
        .unwrap();

    let result = pipeline.execute(&fixture("semicolon_prices.csv")).await.unwrap();

    assert_eq!(result.rows_written, 2);
    assert_eq!(
        stored_content(sink.as_ref()).await,
        vec![
            (date(2024, 1, 1), 45.5, Some("Finland".to_string())),
            (date(2024, 1, 2), 47.25, Some("Finland".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_progress_reports_failure_state() {
    let states = Arc::new(Mutex::new(Vec::new()));
    let states_clone = states.clone();

    let pipeline = Pipeline::builder()
        .sink(memory_sink())
        .on_progress(move |update| states_clone.lock().unwrap().push(update.state))
        .build()
        .unwrap();

    pipeline.run(&fixture("all_invalid.csv")).await;

    assert_eq!(
        *states.lock().unwrap(),
        vec![RunState::Loading, RunState::Cleaning, RunState::Aborted]
    );
}

#[tokio::test]
async fn test_result_json_carries_error_code() {
    let result = pipeline(memory_sink()).run(&fixture("all_invalid.csv")).await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["success"], false);
    assert_eq!(json["state"], "aborted");
    assert_eq!(json["error"]["code"], "NO_USABLE_DATA");
    assert_eq!(json["summary"]["rows_loaded"], 3);
    assert_eq!(json["summary"]["dropped_bad_date"], 1);
    assert_eq!(json["summary"]["dropped_bad_price"], 2);
    assert_eq!(json["summary"]["rows_retained"], 0);
}

#[tokio::test]
async fn test_generated_sample_is_ingested() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("Electric_prices.csv");
    let table = SampleGenerator::default()
        .with_seed(3)
        .generate(date(2023, 1, 1))
        .unwrap();
    write_sample_csv(&path, &table).unwrap();

    let sink = memory_sink();
    let result = pipeline(sink.clone())
        .execute(&SourceLocation::File(path))
        .await
        .unwrap();

    assert_eq!(result.rows_written, 365);
    let stats = sink.stats().await.unwrap();
    assert_eq!(stats.total_records, 365);
    assert_eq!(stats.first_date, Some(date(2023, 1, 1)));
    assert_eq!(stats.last_date, Some(date(2023, 12, 31)));
}

// ============================================================================
// Reporting Read Path
// ============================================================================

#[tokio::test]
async fn test_report_reads_stored_rows() {
    let sink = memory_sink();
    pipeline(sink.clone())
        .execute(&fixture("canonical_prices.csv"))
        .await
        .unwrap();

    let data = load_report_data(sink.as_ref(), None, Some(3)).await.unwrap();

    assert_eq!(data.origin, DataOrigin::Sink);
    assert_eq!(
        data.records.iter().map(|r| r.date).collect::<Vec<_>>(),
        vec![date(2024, 3, 5), date(2024, 3, 4), date(2024, 3, 3)]
    );
}

#[tokio::test]
async fn test_report_falls_back_to_flat_file() {
    let sink = connect_sink(
        &SinkConfig::sqlite("/definitely/not/a/dir/prices.db").with_connect_timeout_secs(1),
        500,
    )
    .unwrap();
    let fallback = FlatFileFallback::new(
        fixtures_path().join("canonical_prices.csv"),
        &PipelineConfig::default(),
    );

    let data = load_report_data(sink.as_ref(), Some(&fallback), None)
        .await
        .unwrap();

    assert_eq!(data.origin, DataOrigin::FlatFile);
    assert_eq!(data.records.len(), 5);

    let stats = data.stats().unwrap().unwrap();
    assert_eq!(stats.count, 5);
    assert_eq!(stats.min, -1.25);
    assert_eq!(stats.max, 61.4);
    assert_eq!(stats.median, 48.75);
    assert_eq!(data.monthly_averages().len(), 1);
}
