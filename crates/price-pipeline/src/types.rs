use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pipeline::RunState;

/// One cleaned price observation in the canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub date: NaiveDate,
    pub price: f64,
    pub area: String,
}

impl CanonicalRecord {
    pub fn new(date: NaiveDate, price: f64, area: impl Into<String>) -> Self {
        Self {
            date,
            price,
            area: area.into(),
        }
    }
}

/// An ordered batch of canonical records, the cleaner's output and the
/// sink's input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    records: Vec<CanonicalRecord>,
}

impl PriceTable {
    pub fn new(records: Vec<CanonicalRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<CanonicalRecord> {
        self.records
    }

    /// Prices in table order.
    pub fn prices(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.price).collect()
    }

    /// Canonical `date`, `price`, `area` columns as a polars frame.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let dates: Vec<NaiveDate> = self.records.iter().map(|r| r.date).collect();
        let prices = self.prices();
        let areas: Vec<&str> = self.records.iter().map(|r| r.area.as_str()).collect();

        DataFrame::new(vec![
            Column::new("date".into(), dates),
            Column::new("price".into(), prices),
            Column::new("area".into(), areas),
        ])
    }
}

impl From<Vec<CanonicalRecord>> for PriceTable {
    fn from(records: Vec<CanonicalRecord>) -> Self {
        Self::new(records)
    }
}

/// A row read back from the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrice {
    pub id: i64,
    pub date: NaiveDate,
    pub price: f64,
    pub area: Option<String>,
    pub inserted_at: NaiveDateTime,
}

impl StoredPrice {
    /// Drop the storage-only fields.
    pub fn to_canonical(&self, default_area: &str) -> CanonicalRecord {
        CanonicalRecord {
            date: self.date,
            price: self.price,
            area: self
                .area
                .clone()
                .unwrap_or_else(|| default_area.to_string()),
        }
    }
}

/// Aggregate figures the sink reports about its table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkStats {
    pub total_records: u64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub average_price: Option<f64>,
}

/// Which columns the cleaner resolved, by their original names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedColumns {
    pub date: String,
    pub price: String,
    pub area: Option<String>,
}

/// Row tallies from one cleaning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningSummary {
    pub rows_loaded: usize,
    pub dropped_bad_date: usize,
    pub dropped_bad_price: usize,
    pub duplicates_removed: usize,
    pub rows_retained: usize,
    pub areas_defaulted: usize,
}

impl CleaningSummary {
    pub fn rows_dropped(&self) -> usize {
        self.dropped_bad_date + self.dropped_bad_price + self.duplicates_removed
    }

    /// Percentage of loaded rows that were discarded.
    pub fn dropped_percentage(&self) -> f64 {
        if self.rows_loaded == 0 {
            0.0
        } else {
            self.rows_dropped() as f64 / self.rows_loaded as f64 * 100.0
        }
    }
}

/// Outcome of a whole pipeline run, as seen by the caller that triggered it.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    /// Diagnostic for display; the error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
    /// Terminal state the run ended in.
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<ResolvedColumns>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CleaningSummary>,
    pub rows_written: usize,
    pub duration_ms: u64,
}

impl PipelineResult {
    /// The error code, if the run failed.
    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(PipelineError::error_code)
    }
}
