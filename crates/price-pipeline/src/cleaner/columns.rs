//! Column resolution: mapping source column names onto the canonical schema.

use crate::error::{PipelineError, Result};
use crate::types::ResolvedColumns;
use crate::utils::normalize_column_name;

/// Substrings that mark a column as the date column.
pub const DATE_CANDIDATES: [&str; 4] = ["date", "datetime", "timestamp", "time"];

/// Substrings that mark a column as the price column.
pub const PRICE_CANDIDATES: [&str; 4] = ["price", "price_eur_mwh", "price_eur", "eur_mwh"];

/// Normalized name of the optional area column.
pub const AREA_COLUMN: &str = "area";

fn matches_any(normalized: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| normalized.contains(c))
}

/// First column whose normalized name contains a date candidate.
pub fn find_date_column<S: AsRef<str>>(names: &[S]) -> Option<usize> {
    names
        .iter()
        .position(|n| matches_any(&normalize_column_name(n.as_ref()), &DATE_CANDIDATES))
}

/// First column, other than `skip`, whose normalized name contains a price
/// candidate.
pub fn find_price_column<S: AsRef<str>>(names: &[S], skip: Option<usize>) -> Option<usize> {
    names.iter().enumerate().position(|(idx, n)| {
        Some(idx) != skip && matches_any(&normalize_column_name(n.as_ref()), &PRICE_CANDIDATES)
    })
}

/// First column whose normalized name is exactly `area`.
pub fn find_area_column<S: AsRef<str>>(names: &[S]) -> Option<usize> {
    names
        .iter()
        .position(|n| normalize_column_name(n.as_ref()) == AREA_COLUMN)
}

/// Resolve the date, price and area columns of a source.
///
/// Matching is a case-insensitive substring test against trimmed names,
/// taking the first match in column order. A single column never plays both
/// roles. Returns the original (unnormalized) names.
///
/// # Example
///
/// ```rust,ignore
/// let cols = resolve_columns(&["Timestamp", "EUR_MWH"]).unwrap();
/// assert_eq!(cols.date, "Timestamp");
/// assert_eq!(cols.price, "EUR_MWH");
/// ```
pub fn resolve_columns<S: AsRef<str>>(names: &[S]) -> Option<ResolvedColumns> {
    let date_idx = find_date_column(names)?;
    let price_idx = find_price_column(names, Some(date_idx))?;
    let area = find_area_column(names)
        .filter(|&idx| idx != date_idx && idx != price_idx)
        .map(|idx| names[idx].as_ref().to_string());

    Some(ResolvedColumns {
        date: names[date_idx].as_ref().to_string(),
        price: names[price_idx].as_ref().to_string(),
        area,
    })
}

/// Like [`resolve_columns`], but reports which role could not be resolved.
pub fn require_columns<S: AsRef<str>>(names: &[S]) -> Result<ResolvedColumns> {
    if let Some(resolved) = resolve_columns(names) {
        return Ok(resolved);
    }

    let date_idx = find_date_column(names);
    let price_idx = find_price_column(names, date_idx);
    let missing = match (date_idx, price_idx) {
        (None, None) => "date and price",
        (None, Some(_)) => "date",
        _ => "price",
    };

    Err(PipelineError::SchemaMismatch {
        missing: missing.to_string(),
        available: names.iter().map(|n| n.as_ref().to_string()).collect(),
    })
}
