//! Cell conversion for the resolved columns.
//!
//! Every column is read through its text form, so a frame loaded as strings
//! and a frame built with typed columns convert identically.

use crate::utils::{is_missing_marker, parse_date, parse_price};
use chrono::NaiveDate;
use polars::prelude::*;

/// Text form of every cell; nulls stay `None`.
fn with_text_values<T, F>(series: &Series, mut convert: F) -> PolarsResult<Vec<Option<T>>>
where
    F: FnMut(&str) -> Option<T>,
{
    let text = if series.dtype() == &DataType::String {
        series.clone()
    } else {
        series.cast(&DataType::String)?
    };

    let str_series = text.str()?;
    let mut result_vec = Vec::with_capacity(str_series.len());
    for opt_val in str_series.into_iter() {
        result_vec.push(opt_val.and_then(&mut convert));
    }
    Ok(result_vec)
}

/// Convert a column to calendar dates; unparseable cells become `None`.
pub(crate) fn series_to_dates(series: &Series) -> PolarsResult<Vec<Option<NaiveDate>>> {
    with_text_values(series, parse_date)
}

/// Convert a column to finite prices; unparseable cells become `None`.
pub(crate) fn series_to_prices(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    with_text_values(series, parse_price)
}

/// Convert a column to trimmed area labels; blank and marker cells become
/// `None`.
pub(crate) fn series_to_areas(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    with_text_values(series, |val| {
        let trimmed = val.trim();
        if is_missing_marker(trimmed) {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
