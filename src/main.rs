//! CLI entry point for the rail punctuality pipeline.
//!
//! Provides subcommands for downloading the monthly TGV punctuality export,
//! summarizing and quality-checking it, and computing aggregate tables.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use rail_punctuality::aggregate::{AggregateOptions, parse_dimensions, parse_metrics};
use rail_punctuality::config::Settings;
use rail_punctuality::fetch::{BasicClient, download_to};
use rail_punctuality::filter::RecordFilter;
use rail_punctuality::output::{print_json, print_pretty, save_table_csv, write_table_csv};
use rail_punctuality::pipeline::Dashboard;
use rail_punctuality::stations::StationTable;
use rail_punctuality::types::{DurationClass, Period};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "rail_punctuality")]
#[command(about = "Prepare and aggregate monthly TGV punctuality data", long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the raw export to the configured data path
    Download {
        /// Source URL (defaults to the configured data URL)
        #[arg(long)]
        url: Option<String>,

        /// Destination file (defaults to the configured data path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Summarize the normalized dataset and its diagnostics
    Summary,
    /// Compute an aggregate table
    Aggregate {
        /// Grouping dimensions: period, route, cause, duration
        #[arg(short, long, value_delimiter = ',')]
        group_by: Vec<String>,

        /// Metrics: punctuality_rate, mean_delay, cause_share, cancel_rate, counts
        #[arg(short, long = "metric", value_delimiter = ',', default_value = "punctuality_rate")]
        metrics: Vec<String>,

        /// First period to include (YYYY-MM)
        #[arg(long, value_parser = parse_period)]
        from: Option<Period>,

        /// Last period to include (YYYY-MM)
        #[arg(long, value_parser = parse_period)]
        to: Option<Period>,

        #[arg(long = "service")]
        services: Vec<String>,

        #[arg(long = "departure")]
        departures: Vec<String>,

        #[arg(long = "arrival")]
        arrivals: Vec<String>,

        /// Journey length classes: short, medium, long, unknown
        #[arg(long = "duration", value_delimiter = ',', value_parser = parse_duration_class)]
        durations: Vec<DurationClass>,

        /// Match selected stations at either end of a route
        #[arg(long, default_value_t = false)]
        bidirectional: bool,

        /// Merge A→B and B→A into one route
        #[arg(long, default_value_t = false)]
        undirected: bool,

        #[arg(short, long, value_enum, default_value_t = Format::Pretty)]
        format: Format,

        /// File to write the table to (json and csv formats only)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report duplicates, inconsistent counts and missing values
    Quality,
    /// Check the station reference against the dataset
    Stations,
    /// Drop the memoized dataset and the on-disk snapshot
    Refresh,
}

fn parse_period(raw: &str) -> std::result::Result<Period, String> {
    Period::parse(raw).ok_or_else(|| format!("invalid period '{raw}', expected YYYY-MM"))
}

fn parse_duration_class(raw: &str) -> std::result::Result<DurationClass, String> {
    DurationClass::parse(raw)
        .ok_or_else(|| format!("invalid duration class '{raw}', expected short, medium, long or unknown"))
}

/// Pretty output is logged only and has no file form.
fn check_output(format: Format, output: Option<&Path>) -> Result<()> {
    if let (Format::Pretty, Some(path)) = (format, output) {
        bail!(
            "--output {} needs --format json or --format csv",
            path.display()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/rail_punctuality.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("rail_punctuality.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Download { url, output } => {
            let url = url.unwrap_or_else(|| settings.data_url.clone());
            let output = output.unwrap_or_else(|| settings.data_path.clone());
            let client = BasicClient::new();
            let bytes = download_to(&client, &url, &output).await?;
            info!(path = %output.display(), bytes, "Raw export saved");
        }
        Commands::Summary => summary(settings)?,
        Commands::Aggregate {
            group_by,
            metrics,
            from,
            to,
            services,
            departures,
            arrivals,
            durations,
            bidirectional,
            undirected,
            format,
            output,
        } => {
            check_output(format, output.as_deref())?;
            let group_by = parse_dimensions(&group_by)?;
            let metrics = parse_metrics(&metrics)?;
            let filter = RecordFilter {
                from,
                to,
                services,
                departures,
                arrivals,
                duration_classes: durations,
                bidirectional,
            };
            let options = AggregateOptions {
                undirected_routes: undirected,
            };

            let mut dashboard = Dashboard::new(settings)?;
            let rows = dashboard.aggregate(&filter, &group_by, &metrics, &options)?;
            info!(groups = rows.len(), "Aggregation complete");

            match (format, output) {
                (Format::Pretty, _) => print_pretty(&rows),
                (Format::Json, None) => print_json(&rows)?,
                (Format::Json, Some(path)) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&rows)?)?;
                    info!(path = %path.display(), "JSON table written");
                }
                (Format::Csv, None) => write_table_csv(std::io::stdout().lock(), &rows)?,
                (Format::Csv, Some(path)) => {
                    save_table_csv(&path, &rows)?;
                    info!(path = %path.display(), "CSV table written");
                }
            }
        }
        Commands::Quality => {
            let mut dashboard = Dashboard::new(settings)?;
            let report = dashboard.quality()?;
            info!(
                records = report.records,
                duplicate_keys = report.duplicate_keys.len(),
                consistency_issues = report.consistency.len(),
                clamped_records = report.clamped_records,
                clean = report.is_clean(),
                "Quality summary"
            );
            info!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stations => stations(settings)?,
        Commands::Refresh => {
            let mut dashboard = Dashboard::new(settings)?;
            dashboard.refresh()?;
            info!("Cache and snapshot cleared");
        }
    }

    Ok(())
}

/// Logs dataset size, parse diagnostics and the available filter values.
#[tracing::instrument(skip_all)]
fn summary(settings: Settings) -> Result<()> {
    let mut dashboard = Dashboard::new(settings)?;
    let dataset = dashboard.dataset()?;
    let catalog = dashboard.catalog()?;

    let report = &dataset.normalize;
    info!(
        total_rows = report.total_rows,
        rows_parsed = report.rows_parsed,
        rows_excluded = report.rows_excluded,
        clamped_cause_values = report.clamped_cause_values,
        "Normalization"
    );
    info!(
        categories = %report.cause_categories.join(", "),
        "Cause categories"
    );
    info!(
        unmatched_lookups = dataset.enrichment.unmatched_lookups,
        missing_stations = dataset.enrichment.missing_stations.len(),
        "Enrichment"
    );

    let first = catalog.first_period().map(|p| p.to_string()).unwrap_or_default();
    let last = catalog.last_period().map(|p| p.to_string()).unwrap_or_default();
    info!(
        periods = catalog.periods.len(),
        first = %first,
        last = %last,
        services = catalog.services.len(),
        departures = catalog.departures.len(),
        arrivals = catalog.arrivals.len(),
        "Coverage"
    );
    Ok(())
}

/// Logs station reference diagnostics and every dataset station without
/// coordinates.
#[tracing::instrument(skip_all)]
fn stations(settings: Settings) -> Result<()> {
    let table = StationTable::load(&settings.stations_path)?;
    info!(
        path = %settings.stations_path.display(),
        stations = table.len(),
        duplicates = table.duplicates,
        skipped = table.skipped,
        "Station reference loaded"
    );

    let mut dashboard = Dashboard::new(settings)?;
    let dataset = dashboard.dataset()?;
    for name in &dataset.enrichment.missing_stations {
        warn!(station = %name, "No coordinates for station");
    }
    info!(
        missing = dataset.enrichment.missing_stations.len(),
        unmatched_lookups = dataset.enrichment.unmatched_lookups,
        "Station coverage"
    );
    Ok(())
}
