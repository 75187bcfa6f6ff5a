//! CLI entry point for the electricity price pipeline.

use anyhow::{Result, anyhow};
use chrono::{Days, Local};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use price_pipeline::{
    FlatFileFallback, Pipeline, PipelineConfig, PipelineResult, PriceSink, PriceTable,
    ReportData, SampleGenerator, SinkConfig, SourceLocation, connect_sink, load_report_data,
    write_sample_csv,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Electricity price ingestion pipeline",
    long_about = "Loads an electricity price table, cleans it, and replaces the content of a \
                  relational table with the result.\n\n\
                  ENVIRONMENT VARIABLES (also read from .env):\n  \
                  DB_BACKEND            mysql (default) or sqlite\n  \
                  DB_HOST, DB_PORT      MySQL server (localhost:3306)\n  \
                  DB_NAME, DB_USER      MySQL database and user (electric_data, electric)\n  \
                  DB_PASSWORD           MySQL password\n  \
                  DB_SQLITE_PATH        SQLite file (electric_data.db)\n  \
                  DB_TABLE              Target table (electric_prices)\n  \
                  DEFAULT_AREA          Area label for rows without one (Finland)\n\n\
                  EXAMPLES:\n  \
                  price-pipeline run data/Electric_prices.csv\n  \
                  price-pipeline run https://example.org/prices.csv --json\n  \
                  price-pipeline show --limit 10 --fallback data/Electric_prices.csv\n  \
                  price-pipeline generate-sample data/Electric_prices.csv"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all logs; only the final JSON document is written.
    #[arg(long, global = true)]
    json: bool,

    /// Field separator of delimited sources
    #[arg(long, default_value = ",", global = true)]
    separator: char,

    /// Area label for rows without one (overrides DEFAULT_AREA)
    #[arg(long, global = true)]
    default_area: Option<String>,

    /// Rows per INSERT statement (1-10000)
    #[arg(long, default_value = "500", global = true)]
    batch_size: usize,

    /// HTTP source timeout in seconds
    #[arg(long, default_value = "30", global = true)]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, clean and store a price table
    Run {
        /// File path or http(s) URL of the source
        source: String,
    },

    /// Create the target table if it does not exist
    InitSchema,

    /// Print the most recent stored rows
    Show {
        /// Number of rows to print
        #[arg(long, default_value = "20")]
        limit: usize,

        /// CSV file to read if the database is unavailable
        #[arg(long)]
        fallback: Option<PathBuf>,
    },

    /// Print descriptive statistics of the stored prices
    Stats {
        /// CSV file to read if the database is unavailable
        #[arg(long)]
        fallback: Option<PathBuf>,
    },

    /// Write a synthetic year of daily prices as CSV
    GenerateSample {
        /// Output file
        path: PathBuf,

        /// Number of days
        #[arg(long, default_value = "365")]
        days: usize,

        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    // Load environment variables from .env file
    dotenv().ok();

    let (config, sink_config) = build_configs(&args)?;

    match &args.command {
        Command::Run { source } => {
            let sink = connect_sink(&sink_config, config.insert_batch_size)?;
            run_pipeline(&args, config, sink, source).await
        }
        Command::InitSchema => {
            let sink = connect_sink(&sink_config, config.insert_batch_size)?;
            sink.ensure_schema().await?;
            print_or_json(&args, &serde_json::json!({ "schema_ready": sink.describe() }), || {
                println!("Schema ready on {}", sink.describe());
            })
        }
        Command::Show { limit, fallback } => {
            let sink = connect_sink(&sink_config, config.insert_batch_size)?;
            let fallback = fallback.as_ref().map(|p| FlatFileFallback::new(p, &config));
            let data = load_report_data(sink.as_ref(), fallback.as_ref(), Some(*limit)).await?;
            print_or_json(&args, &data, || print_rows(&data))
        }
        Command::Stats { fallback } => {
            let sink = connect_sink(&sink_config, config.insert_batch_size)?;
            let fallback = fallback.as_ref().map(|p| FlatFileFallback::new(p, &config));
            show_stats(&args, sink.as_ref(), fallback.as_ref()).await
        }
        Command::GenerateSample { path, days, seed } => {
            let mut generator = SampleGenerator::default().with_days(*days);
            if let Some(seed) = seed {
                generator = generator.with_seed(*seed);
            }
            let start = Local::now()
                .date_naive()
                .checked_sub_days(Days::new(*days as u64))
                .ok_or_else(|| anyhow!("{} days back from today is before the calendar", days))?;
            let table = generator.generate(start)?;
            write_sample_csv(path, &table)?;
            print_or_json(
                &args,
                &serde_json::json!({ "path": path, "rows": table.len() }),
                || println!("Wrote {} sample rows to {}", table.len(), path.display()),
            )
        }
    }
}

/// Pipeline and sink configuration from flags and environment.
fn build_configs(args: &Args) -> Result<(PipelineConfig, SinkConfig)> {
    let separator =
        u8::try_from(args.separator).map_err(|_| anyhow!("Separator must be ASCII"))?;

    let mut sink_config = SinkConfig::from_env()?;
    if let Some(area) = &args.default_area {
        sink_config.default_area = area.clone();
    }

    let config = PipelineConfig::builder()
        .separator(separator)
        .default_area(sink_config.default_area.clone())
        .source_timeout_secs(args.timeout)
        .insert_batch_size(args.batch_size)
        .build()?;

    Ok((config, sink_config))
}

/// Run pipeline and print results
async fn run_pipeline(
    args: &Args,
    config: PipelineConfig,
    sink: Arc<dyn PriceSink>,
    source: &str,
) -> Result<()> {
    let mut builder = Pipeline::builder().config(config).sink(sink);

    if !args.quiet {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.state.display_name(),
                update.message
            );
        });
    }

    let pipeline = builder.build()?;
    let result = pipeline.run(&SourceLocation::parse(source)).await;

    print_or_json(args, &result, || print_run_summary(&result))?;

    if result.success {
        Ok(())
    } else {
        let message = result.message.unwrap_or_else(|| "Unknown error".to_string());
        error!("Pipeline failed: {}", message);
        Err(anyhow!("Pipeline failed: {}", message))
    }
}

#[derive(Serialize)]
struct StatsReport<'a> {
    data: &'a ReportData,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<price_pipeline::SinkStats>,
    prices: Option<price_pipeline::PriceStats>,
    monthly_averages: Vec<price_pipeline::MonthlyAverage>,
}

async fn show_stats(
    args: &Args,
    sink: &dyn PriceSink,
    fallback: Option<&FlatFileFallback>,
) -> Result<()> {
    let data = load_report_data(sink, fallback, None).await?;
    let database = match data.origin {
        price_pipeline::DataOrigin::Sink => Some(sink.stats().await?),
        price_pipeline::DataOrigin::FlatFile => None,
    };

    let report = StatsReport {
        data: &data,
        database,
        prices: data.stats()?,
        monthly_averages: data.monthly_averages(),
    };

    print_or_json(args, &report, || print_stats(&report))
}

/// Print `value` as JSON under `--json`, otherwise run `human`.
///
/// Note: human output uses `println!` intentionally; it is the command's
/// result and must be visible regardless of log level.
fn print_or_json<T: Serialize>(args: &Args, value: &T, human: impl FnOnce()) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human();
    }
    Ok(())
}

fn print_run_summary(result: &PipelineResult) {
    println!("\n{}", "=".repeat(60));
    println!(
        "RUN {} ({:?}, {} ms)",
        if result.success { "SUCCEEDED" } else { "FAILED" },
        result.state,
        result.duration_ms
    );
    println!("{}", "=".repeat(60));

    if let Some(columns) = &result.columns {
        println!(
            "  Columns:        date={:?} price={:?} area={:?}",
            columns.date, columns.price, columns.area
        );
    }

    if let Some(summary) = &result.summary {
        println!("  Rows loaded:    {}", summary.rows_loaded);
        println!("  Bad dates:      {}", summary.dropped_bad_date);
        println!("  Bad prices:     {}", summary.dropped_bad_price);
        println!("  Duplicates:     {}", summary.duplicates_removed);
        println!("  Areas defaulted:{:>5}", summary.areas_defaulted);
        println!(
            "  Rows retained:  {} ({:.1}% dropped)",
            summary.rows_retained,
            summary.dropped_percentage()
        );
    }

    println!("  Rows written:   {}", result.rows_written);
    if let Some(message) = &result.message {
        println!("  {}", message);
    }
    if let Some(code) = result.error_code() {
        println!("  Error code:     {}", code);
    }
    println!();
}

fn print_rows(data: &ReportData) {
    println!("Source: {} ({:?})", data.location, data.origin);
    match PriceTable::new(data.records.clone()).to_dataframe() {
        Ok(df) => println!("{}", df),
        Err(e) => println!("Could not render rows: {}", e),
    }
}

fn print_stats(report: &StatsReport<'_>) {
    println!("Source: {} ({:?})", report.data.location, report.data.origin);

    if let Some(db) = &report.database {
        println!("\nDATABASE");
        println!("{}", "-".repeat(40));
        println!("  Records:        {}", db.total_records);
        if let (Some(first), Some(last)) = (db.first_date, db.last_date) {
            println!("  Date range:     {} .. {}", first, last);
        }
        if let Some(avg) = db.average_price {
            println!("  Average price:  {:.2} EUR/MWh", avg);
        }
    }

    println!("\nDESCRIPTIVE STATISTICS");
    println!("{}", "-".repeat(40));
    match &report.prices {
        Some(s) => {
            println!("  Count:    {}", s.count);
            println!("  Mean:     {:.2}", s.mean);
            println!("  Std Dev:  {:.2}", s.std_dev);
            println!("  Min:      {:.2}", s.min);
            println!("  25%:      {:.2}", s.q25);
            println!("  50%:      {:.2}", s.median);
            println!("  75%:      {:.2}", s.q75);
            println!("  Max:      {:.2}", s.max);
        }
        None => println!("  No rows"),
    }

    println!("\nMONTHLY AVERAGES (last 12 months)");
    println!("{}", "-".repeat(40));
    let skip = report.monthly_averages.len().saturating_sub(12);
    for month in report.monthly_averages.iter().skip(skip) {
        println!(
            "  {}  {:>8.2}  ({} days)",
            month.month, month.average_price, month.count
        );
    }
    println!();
}
