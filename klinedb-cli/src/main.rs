//! klinedb CLI: ingest daily kline archives into a local store.
//!
//! Commands:
//! - `ingest` runs the fetch/extract/load pipeline from a TOML config
//! - `urls` prints the archive URLs a date range expands to
//! - `status` reports what the store holds per series

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use klinedb_core::{generate, HttpSource, SqliteStore, StagingLayout};
use klinedb_runner::{run, IngestConfig, Pipeline, RunSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "klinedb=info,klinedb_core=info,klinedb_runner=info";

#[derive(Parser)]
#[command(
    name = "klinedb",
    version,
    about = "Ingest Binance daily kline archives into SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, extract and load every configured series over a date range.
    Ingest {
        /// Path to the TOML config file.
        #[arg(long, default_value = "klinedb.toml")]
        config: PathBuf,

        /// Override the first day (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Override the last day (YYYY-MM-DD, inclusive).
        #[arg(long)]
        end: Option<String>,

        /// Override the worker count.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Override the staging directory.
        #[arg(long)]
        staging_dir: Option<PathBuf>,

        /// Override the SQLite database path.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the archive URLs for a base template and date range.
    Urls {
        /// URL prefix; the date and `.zip` are appended.
        #[arg(long)]
        base: String,

        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// Last day (YYYY-MM-DD). Defaults to yesterday (UTC).
        #[arg(long)]
        end: Option<String>,
    },
    /// Report row counts and time coverage per series.
    Status {
        /// SQLite database path.
        #[arg(long, default_value = "klines.db")]
        db: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            config,
            start,
            end,
            concurrency,
            staging_dir,
            db,
        } => run_ingest(&config, start, end, concurrency, staging_dir, db),
        Commands::Urls { base, start, end } => run_urls(&base, &start, end.as_deref()),
        Commands::Status { db, json } => run_status(&db, json),
    }
}

fn run_ingest(
    config_path: &Path,
    start: Option<String>,
    end: Option<String>,
    concurrency: Option<usize>,
    staging_dir: Option<PathBuf>,
    db: Option<PathBuf>,
) -> Result<()> {
    let mut config = IngestConfig::from_file(config_path)?;
    config.apply_env()?;

    if let Some(start) = start {
        config.start_date = start;
    }
    if end.is_some() {
        config.end_date = end;
    }
    if concurrency.is_some() {
        config.concurrency = concurrency;
    }
    if let Some(dir) = staging_dir {
        config.staging_dir = dir;
    }
    if let Some(path) = db {
        config.store.path = path;
    }

    let jobs = config.jobs()?;
    info!(
        config = %config_path.display(),
        sources = config.sources.len(),
        jobs = jobs.len(),
        "planned ingest"
    );

    let source = HttpSource::new(config.request_timeout()).context("building HTTP client")?;
    let store = SqliteStore::open(&config.store.path)
        .with_context(|| format!("opening store {}", config.store.path.display()))?;
    let pipeline = Pipeline::new(
        Arc::new(source),
        StagingLayout::new(&config.staging_dir),
        Arc::new(store),
    );

    let summary = run(jobs, config.effective_concurrency(), &pipeline);
    print_summary(&summary);

    if !summary.all_succeeded() {
        for (job, err) in summary.failures() {
            eprintln!("Failed {job} ({}): {err}", job.url);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Jobs: {} total, {} succeeded, {} failed",
        summary.total(),
        summary.succeeded(),
        summary.failed()
    );
    println!(
        "Archives downloaded: {} | Rows processed: {} | Rows inserted: {}",
        summary.downloaded(),
        summary.rows_processed(),
        summary.rows_inserted()
    );
    println!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
}

fn run_urls(base: &str, start: &str, end: Option<&str>) -> Result<()> {
    for url in generate(base, start, end)? {
        println!("{url}");
    }
    Ok(())
}

fn run_status(db: &Path, json: bool) -> Result<()> {
    if !db.exists() {
        println!("Store does not exist: {}", db.display());
        return Ok(());
    }

    let store = SqliteStore::open(db)?;
    let series = store.summary()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&series)?);
        return Ok(());
    }

    if series.is_empty() {
        println!("Store is empty: {}", db.display());
        return Ok(());
    }

    println!(
        "{:<12} {:<16} {:>10}  {:<20}  {:<20}",
        "EXCHANGE", "TOKEN", "ROWS", "FIRST", "LAST"
    );
    for s in &series {
        println!(
            "{:<12} {:<16} {:>10}  {:<20}  {:<20}",
            s.exchange,
            s.token,
            s.rows,
            format_millis(s.first_open_time),
            format_millis(s.last_open_time)
        );
    }
    let total: u64 = series.iter().map(|s| s.rows).sum();
    println!("Series: {} | Rows: {total}", series.len());

    Ok(())
}

fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ingest_flags_parse() {
        let cli = Cli::try_parse_from([
            "klinedb",
            "ingest",
            "--config",
            "prod.toml",
            "--start",
            "2024-09-01",
            "--concurrency",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Ingest {
                config,
                start,
                end,
                concurrency,
                ..
            } => {
                assert_eq!(config, PathBuf::from("prod.toml"));
                assert_eq!(start.as_deref(), Some("2024-09-01"));
                assert_eq!(end, None);
                assert_eq!(concurrency, Some(4));
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn millis_render_as_utc_minutes() {
        assert_eq!(format_millis(1_704_067_200_000), "2024-01-01 00:00");
    }
}
