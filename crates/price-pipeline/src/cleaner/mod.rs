//! Normalization of loaded tables into the canonical price schema.
//!
//! This module provides functionality for:
//! - Resolving the date, price and area columns by name
//! - Parsing dates and prices, dropping rows where either fails
//! - Defaulting missing areas
//! - Removing duplicate observations

mod columns;
mod converters;

pub use columns::{
    AREA_COLUMN, DATE_CANDIDATES, PRICE_CANDIDATES, find_area_column, find_date_column,
    find_price_column, require_columns, resolve_columns,
};

use crate::config::{DEFAULT_AREA, PipelineConfig};
use crate::error::{PipelineError, Result, ResultExt};
use crate::loader::RawTable;
use crate::types::{CanonicalRecord, CleaningSummary, PriceTable, ResolvedColumns};
use crate::utils::round_to_cents;
use chrono::NaiveDate;
use converters::{series_to_areas, series_to_dates, series_to_prices};
use std::collections::HashSet;
use tracing::{debug, info};

/// Output of one cleaning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedBatch {
    pub table: PriceTable,
    pub columns: ResolvedColumns,
    pub summary: CleaningSummary,
}

/// Cleaner for raw price tables.
#[derive(Debug, Clone)]
pub struct PriceCleaner {
    default_area: String,
}

impl Default for PriceCleaner {
    fn default() -> Self {
        Self::new(DEFAULT_AREA)
    }
}

impl PriceCleaner {
    pub fn new(default_area: impl Into<String>) -> Self {
        Self {
            default_area: default_area.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.default_area.clone())
    }

    pub fn default_area(&self) -> &str {
        &self.default_area
    }

    /// Clean a loaded table.
    ///
    /// Rows are processed in source order:
    /// 1. Rows whose date cell does not parse are dropped
    /// 2. Rows whose price cell does not parse to a finite number are dropped
    /// 3. A blank or absent area becomes the default area
    /// 4. Repeats of an earlier `(date, price)` pair are dropped, comparing
    ///    prices rounded to cents
    ///
    /// Fails with [`PipelineError::SchemaMismatch`] when the columns cannot be
    /// resolved and [`PipelineError::NoUsableData`] when no row survives.
    pub fn clean(&self, raw: &RawTable) -> Result<CleanedBatch> {
        let columns = require_columns(&raw.column_names())?;
        debug!(
            "Resolved columns: date={:?}, price={:?}, area={:?}",
            columns.date, columns.price, columns.area
        );

        let frame = raw.frame();
        let dates = series_to_dates(frame.column(&columns.date)?.as_materialized_series())
            .context("Converting date column")?;
        let prices = series_to_prices(frame.column(&columns.price)?.as_materialized_series())
            .context("Converting price column")?;
        let areas = match &columns.area {
            Some(name) => series_to_areas(frame.column(name)?.as_materialized_series())
                .context("Converting area column")?,
            None => vec![None; frame.height()],
        };

        let mut summary = CleaningSummary {
            rows_loaded: frame.height(),
            ..CleaningSummary::default()
        };
        let mut seen: HashSet<(NaiveDate, u64)> = HashSet::new();
        let mut records = Vec::with_capacity(frame.height());

        for ((date, price), area) in dates.into_iter().zip(prices).zip(areas) {
            let Some(date) = date else {
                summary.dropped_bad_date += 1;
                continue;
            };
            let Some(price) = price else {
                summary.dropped_bad_price += 1;
                continue;
            };

            let area = match area {
                Some(area) => area,
                None => {
                    summary.areas_defaulted += 1;
                    self.default_area.clone()
                }
            };

            if !seen.insert((date, price_key(price))) {
                summary.duplicates_removed += 1;
                continue;
            }

            records.push(CanonicalRecord::new(date, price, area));
        }

        summary.rows_retained = records.len();

        info!(
            "Cleaned {} rows: {} retained, {} bad dates, {} bad prices, {} duplicates",
            summary.rows_loaded,
            summary.rows_retained,
            summary.dropped_bad_date,
            summary.dropped_bad_price,
            summary.duplicates_removed
        );

        if records.is_empty() {
            return Err(PipelineError::NoUsableData { summary });
        }

        Ok(CleanedBatch {
            table: PriceTable::new(records),
            columns,
            summary,
        })
    }
}

/// Hashable identity of a price at the precision the sink stores; `-0.0` and
/// `0.0` are the same price.
fn price_key(price: f64) -> u64 {
    let cents = round_to_cents(price);
    let normalized = if cents == 0.0 { 0.0f64 } else { cents };
    normalized.to_bits()
}
