//! Loading tabular sources into memory.
//!
//! The loader is a pure ingestion step: every column is read as text under
//! its original name and in its original order. Interpreting cells is the
//! cleaner's job.

mod sample;

pub use sample::{SampleGenerator, write_sample_csv};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Where a tabular source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Delimited file on the local filesystem.
    File(PathBuf),
    /// Delimited dataset served over HTTP(S).
    Url(String),
}

impl SourceLocation {
    /// Classify a user-supplied location string.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceLocation::Url(trimmed.to_string())
        } else {
            SourceLocation::File(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::File(path) => write!(f, "{}", path.display()),
            SourceLocation::Url(url) => write!(f, "{}", url),
        }
    }
}

impl From<&Path> for SourceLocation {
    fn from(path: &Path) -> Self {
        SourceLocation::File(path.to_path_buf())
    }
}

/// One source row: column name and raw cell text, in source order.
pub type RawRecord = Vec<(String, Option<String>)>;

/// A loaded source table.
#[derive(Debug, Clone)]
pub struct RawTable {
    frame: DataFrame,
}

impl RawTable {
    /// Wrap an existing frame. Typed columns are accepted; the cleaner reads
    /// every column through its text form.
    pub fn from_dataframe(frame: DataFrame) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    /// Column names as they appear in the source.
    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    /// The row at `idx`, or `None` past the end.
    pub fn record(&self, idx: usize) -> Option<RawRecord> {
        if idx >= self.frame.height() {
            return None;
        }

        let mut record = Vec::with_capacity(self.frame.width());
        for col in self.frame.get_columns() {
            let value = match col.get(idx).ok()? {
                AnyValue::Null => None,
                AnyValue::String(s) => Some(s.to_string()),
                AnyValue::StringOwned(s) => Some(s.to_string()),
                other => Some(format!("{}", other)),
            };
            record.push((col.name().to_string(), value));
        }
        Some(record)
    }
}

/// Reader for delimited sources with a header row.
#[derive(Debug, Clone)]
pub struct CsvLoader {
    separator: u8,
    timeout: Duration,
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

impl CsvLoader {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            separator: config.separator,
            timeout: Duration::from_secs(config.source_timeout_secs),
        }
    }

    /// Load a source, whichever kind of location it is.
    pub async fn load(&self, source: &SourceLocation) -> Result<RawTable> {
        let table = match source {
            SourceLocation::File(path) => self.load_file(path)?,
            SourceLocation::Url(url) => self.load_url(url).await?,
        };

        info!(
            "Loaded {} rows x {} columns from {}",
            table.height(),
            table.width(),
            source
        );
        Ok(table)
    }

    /// Read a delimited file from disk.
    pub fn load_file(&self, path: &Path) -> Result<RawTable> {
        let name = path.display().to_string();

        if !path.is_file() {
            return Err(PipelineError::source_unavailable(name, "file not found"));
        }

        debug!("Reading {} (separator {:?})", name, self.separator as char);

        let frame = self
            .read_options()
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .and_then(|reader| reader.finish())
            .map_err(|e| PipelineError::source_unavailable(name, e))?;

        Ok(RawTable::from_dataframe(frame))
    }

    /// Fetch and parse a delimited dataset over HTTP.
    pub async fn load_url(&self, url: &str) -> Result<RawTable> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::source_unavailable(url, e))?;

        debug!("Fetching {} (timeout {:?})", url, self.timeout);

        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::source_unavailable(url, e))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::source_unavailable(url, e))?;

        self.load_bytes(url, body.to_vec())
    }

    /// Parse an in-memory delimited payload.
    pub fn load_bytes(&self, name: &str, bytes: Vec<u8>) -> Result<RawTable> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(PipelineError::source_unavailable(name, "source is empty"));
        }

        let frame = self
            .read_options()
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .map_err(|e| PipelineError::source_unavailable(name, e))?;

        Ok(RawTable::from_dataframe(frame))
    }

    /// Header row required; schema inference off so every column is text.
    fn read_options(&self) -> CsvReadOptions {
        let separator = self.separator;
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .map_parse_options(|opts| opts.with_separator(separator))
    }
}
