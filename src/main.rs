//! CLI entry point for the GTFS-RT Inspector.
//!
//! Provides a one-shot `validate` subcommand for a single feed snapshot and
//! a `monitor` subcommand that continuously polls every configured source.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use gtfs_rt_inspector::config::MonitorConfig;
use gtfs_rt_inspector::fetch::{BasicClient, fetch_bytes};
use gtfs_rt_inspector::output::{CsvSink, ReportSink, ValidationReport, log_summary};
use gtfs_rt_inspector::parser::parse_feed;
use gtfs_rt_inspector::rules::RuleRegistry;
use gtfs_rt_inspector::schedule::{
    ScheduleHandle, ScheduleMetadata, StaticSchedule, TripPatterns,
};
use gtfs_rt_inspector::scheduler::{FeedSource, PollScheduler};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_inspector")]
#[command(about = "A tool to validate GTFS-RT feeds against GTFS schedules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a single GTFS-RT snapshot from a file or URL
    Validate {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// GTFS stop_times.txt to cross-reference against
        #[arg(short = 'g', long)]
        stop_times: Option<String>,

        /// CSV file to append violations to
        #[arg(short, long, default_value = "violations.csv")]
        output: String,
    },
    /// Continuously poll and validate all configured feed sources
    Monitor {
        /// JSON config file listing the sources
        #[arg(short, long, default_value = "sources.json")]
        config: String,

        /// GTFS stop_times.txt to cross-reference against
        #[arg(short = 'g', long)]
        stop_times: Option<String>,

        /// CSV file to append violations to
        #[arg(short, long, default_value = "violations.csv")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_inspector.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_inspector.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            source,
            stop_times,
            output,
        } => validate_once(&source, stop_times.as_deref(), &output).await?,
        Commands::Monitor {
            config,
            stop_times,
            output,
        } => monitor(&config, stop_times.as_deref(), &output).await?,
    }

    Ok(())
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::new()?;
        fetch_bytes(&client, url).await?
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}

/// Loads the static schedule, or an empty one when no path is given (every
/// cross-reference check is then skipped).
fn load_schedule(stop_times: Option<&str>) -> Result<StaticSchedule> {
    let patterns = match stop_times {
        Some(path) => TripPatterns::from_stop_times_path(path)?,
        None => {
            info!("No static schedule given, cross-reference checks disabled");
            TripPatterns::default()
        }
    };
    Ok(StaticSchedule {
        patterns,
        metadata: ScheduleMetadata {
            version: stop_times.map(str::to_string),
            loaded_at: Utc::now(),
        },
    })
}

/// One-shot validation of a single snapshot.
async fn validate_once(source: &str, stop_times: Option<&str>, output: &str) -> Result<()> {
    let schedule = load_schedule(stop_times)?;
    let registry = RuleRegistry::default();

    let bytes = fetcher(source).await?;
    let feed = parse_feed(&bytes).context("decoding feed snapshot")?;
    let now = Utc::now();

    let violations = registry.evaluate(
        now.timestamp() as u64,
        &schedule.patterns,
        &schedule.metadata,
        &feed,
        None,
    );

    let report = ValidationReport {
        source_id: source.to_string(),
        timestamp: now,
        violations,
    };
    log_summary(&report);

    let sink = CsvSink::new(output);
    sink.publish(&report).await?;

    Ok(())
}

/// Runs the poll scheduler over every configured source until Ctrl-C.
#[tracing::instrument(skip_all, fields(config = %config_path))]
async fn monitor(config_path: &str, stop_times: Option<&str>, output: &str) -> Result<()> {
    let config = MonitorConfig::load(config_path)?;
    anyhow::ensure!(
        !config.sources.is_empty(),
        "config {config_path} lists no sources"
    );

    let schedule = ScheduleHandle::new(load_schedule(stop_times)?);
    let sink = Arc::new(CsvSink::new(output));
    let scheduler = PollScheduler::new(RuleRegistry::default(), schedule, sink);

    for source_config in &config.sources {
        let fetcher = source_config.build_fetcher()?;
        scheduler
            .start(
                FeedSource {
                    id: source_config.id.clone(),
                    url: source_config.url.clone(),
                    interval: source_config.interval(),
                },
                fetcher,
            )
            .await;
    }

    info!(sources = config.sources.len(), "Monitoring started, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested, stopping all sources");
    scheduler.stop_all().await;

    Ok(())
}
