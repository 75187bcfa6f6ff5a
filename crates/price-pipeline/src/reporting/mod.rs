//! Read path for reporting collaborators.
//!
//! Reports read the stored table through [`load_report_data`]. When the sink
//! cannot be reached the caller may name a flat file to fall back to; rows
//! from that file go through the same cleaner as a pipeline run and are
//! tagged [`DataOrigin::FlatFile`] so a dashboard can say where its numbers
//! came from.
//!
//! # Example
//!
//! ```rust,ignore
//! use price_pipeline::reporting::{FlatFileFallback, load_report_data};
//!
//! let fallback = FlatFileFallback::new("data/Electric_prices.csv", &config);
//! let data = load_report_data(sink.as_ref(), Some(&fallback), None).await?;
//!
//! if let Some(stats) = data.stats()? {
//!     println!("{} rows, mean {:.2} EUR/MWh", stats.count, stats.mean);
//! }
//! ```

use crate::cleaner::PriceCleaner;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::loader::CsvLoader;
use crate::sink::PriceSink;
use crate::types::CanonicalRecord;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where report rows were read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    Sink,
    FlatFile,
}

/// A flat file to read when the sink is unavailable.
#[derive(Debug, Clone)]
pub struct FlatFileFallback {
    path: PathBuf,
    loader: CsvLoader,
    cleaner: PriceCleaner,
}

impl FlatFileFallback {
    pub fn new(path: impl Into<PathBuf>, config: &PipelineConfig) -> Self {
        Self {
            path: path.into(),
            loader: CsvLoader::new(config),
            cleaner: PriceCleaner::from_config(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rows for a report, newest date first.
#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub origin: DataOrigin,
    /// Sink description or file path.
    pub location: String,
    pub records: Vec<CanonicalRecord>,
}

impl ReportData {
    /// Descriptive statistics over the prices; `None` when there are no rows.
    pub fn stats(&self) -> PolarsResult<Option<PriceStats>> {
        let prices: Vec<f64> = self.records.iter().map(|r| r.price).collect();
        PriceStats::from_series(&Series::new("price".into(), prices))
    }

    pub fn monthly_averages(&self) -> Vec<MonthlyAverage> {
        monthly_averages(&self.records)
    }
}

/// Read report rows from the sink, falling back to `fallback` only when the
/// sink is unavailable.
///
/// Any other sink error is returned as is, and so is a failure to load or
/// clean the fallback file.
pub async fn load_report_data(
    sink: &dyn PriceSink,
    fallback: Option<&FlatFileFallback>,
    limit: Option<usize>,
) -> Result<ReportData> {
    let err = match sink.query(limit).await {
        Ok(rows) => {
            let default_area = fallback
                .map(|f| f.cleaner.default_area())
                .unwrap_or(crate::config::DEFAULT_AREA);
            info!("Read {} rows from {}", rows.len(), sink.describe());
            return Ok(ReportData {
                origin: DataOrigin::Sink,
                location: sink.describe(),
                records: rows.iter().map(|r| r.to_canonical(default_area)).collect(),
            });
        }
        Err(e) => e,
    };

    let fallback = match (fallback, err.root()) {
        (Some(fallback), PipelineError::SinkUnavailable(_)) => fallback,
        _ => return Err(err),
    };

    warn!(
        "Sink unavailable ({}), reading {} instead",
        err,
        fallback.path.display()
    );

    let raw = fallback.loader.load_file(&fallback.path)?;
    let mut records = fallback.cleaner.clean(&raw)?.table.into_records();
    records.sort_by(|a, b| b.date.cmp(&a.date));
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    Ok(ReportData {
        origin: DataOrigin::FlatFile,
        location: fallback.path.display().to_string(),
        records,
    })
}

// =============================================================================
// Statistics
// =============================================================================

/// Descriptive statistics of a price column.
///
/// Standard deviation is the sample deviation; quartiles interpolate
/// linearly between order statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

impl PriceStats {
    /// Statistics over the non-null values of `series`.
    pub fn from_series(series: &Series) -> PolarsResult<Option<Self>> {
        let non_null = series.drop_nulls().cast(&DataType::Float64)?;
        if non_null.is_empty() {
            return Ok(None);
        }

        let sorted = non_null.sort(SortOptions::default())?;
        let values: Vec<f64> = sorted.f64()?.into_iter().flatten().collect();
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;

        let std_dev = if count > 1 {
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / (count as f64 - 1.0);
            variance.sqrt()
        } else {
            0.0
        };

        Ok(Some(Self {
            count,
            mean,
            std_dev,
            min: values[0],
            q25: quantile(&values, 0.25),
            median: quantile(&values, 0.5),
            q75: quantile(&values, 0.75),
            max: values[count - 1],
        }))
    }
}

/// Linear-interpolated quantile of ascending, non-empty `sorted`.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Mean price of one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAverage {
    /// `YYYY-MM`
    pub month: String,
    pub average_price: f64,
    pub count: usize,
}

/// Per-month mean prices, oldest month first.
pub fn monthly_averages(records: &[CanonicalRecord]) -> Vec<MonthlyAverage> {
    let mut months: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in records {
        let entry = months
            .entry(record.date.format("%Y-%m").to_string())
            .or_insert((0.0, 0));
        entry.0 += record.price;
        entry.1 += 1;
    }

    months
        .into_iter()
        .map(|(month, (sum, count))| MonthlyAverage {
            month,
            average_price: sum / count as f64,
            count,
        })
        .collect()
}
