//! Synthetic daily price series for local development.

use crate::config::DEFAULT_AREA;
use crate::error::{PipelineError, Result};
use crate::types::{CanonicalRecord, PriceTable};
use crate::utils::round_to_cents;
use chrono::{Days, NaiveDate};
use polars::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Generator for a year-shaped series: a base level, one sine period of
/// seasonality, Gaussian noise, and a price floor.
#[derive(Debug, Clone)]
pub struct SampleGenerator {
    pub days: usize,
    pub base_price: f64,
    pub seasonal_amplitude: f64,
    pub noise_std_dev: f64,
    pub floor: f64,
    pub seed: Option<u64>,
}

impl Default for SampleGenerator {
    fn default() -> Self {
        Self {
            days: 365,
            base_price: 60.0,
            seasonal_amplitude: 20.0,
            noise_std_dev: 15.0,
            floor: 10.0,
            seed: None,
        }
    }
}

impl SampleGenerator {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_days(mut self, days: usize) -> Self {
        self.days = days;
        self
    }

    /// Generate `days` consecutive daily prices starting at `start`.
    ///
    /// Fails with [`PipelineError::InvalidConfig`] when the range runs past
    /// the last representable date.
    pub fn generate(&self, start: NaiveDate) -> Result<PriceTable> {
        let out_of_range = || {
            PipelineError::InvalidConfig(format!(
                "{} days from {} run past the calendar",
                self.days, start
            ))
        };
        if self.days > 0 {
            start
                .checked_add_days(Days::new(self.days as u64 - 1))
                .ok_or_else(out_of_range)?;
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // A zero or negative deviation degenerates to no noise.
        let noise = Normal::new(0.0, self.noise_std_dev.max(f64::MIN_POSITIVE))
            .unwrap_or_else(|_| Normal::new(0.0, 1.0).expect("unit normal is valid"));

        let period = self.days.max(1) as f64;
        let records = (0..self.days)
            .map(|day| {
                let date = start
                    .checked_add_days(Days::new(day as u64))
                    .ok_or_else(out_of_range)?;
                let seasonal = self.seasonal_amplitude * (2.0 * PI * day as f64 / period).sin();
                let price = (self.base_price + seasonal + noise.sample(&mut rng)).max(self.floor);
                Ok(CanonicalRecord::new(date, round_to_cents(price), DEFAULT_AREA))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PriceTable::new(records))
    }
}

/// Write a table as `date,price_eur_mwh,area` CSV, creating parent
/// directories as needed.
pub fn write_sample_csv(path: &Path, table: &PriceTable) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut df = table.to_dataframe()?;
    df.rename("price", "price_eur_mwh".into())?;

    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df)?;

    info!("Wrote {} sample rows to {}", table.len(), path.display());
    Ok(())
}
