mod config;
mod errors;
mod export;
mod loader;
mod models;
mod pipeline;
mod platform;
mod storage;
mod utils;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::loader::CsvCacheStore;
use crate::models::{ScanOutcome, ScanUnit};
use crate::pipeline::{scan_unit, Backend, BatchScanner, BatchSummary, LogProgress};
use crate::platform::PlatformClassifier;
use crate::storage::{Repository, SeriesStore};

#[derive(Parser)]
#[command(name = "platform-scan", about = "Scan cached daily series for platform (consolidation) periods", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Classify every cached unit and export the results
    Scan {
        /// Preferred execution backend (falls back to thread if unavailable)
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,

        /// Number of concurrent workers (default: hardware parallelism)
        #[arg(short = 'j', long)]
        parallelism: Option<usize>,

        /// Directory for JSON results
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip writing result files
        #[arg(long)]
        no_export: bool,

        /// Only scan these symbols
        #[arg(short, long)]
        symbol: Vec<String>,
    },

    /// Classify a single unit, bypassing the worker pool
    Inspect {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,

        /// Print the full JSON payload instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// List the units available in the configured store
    Units,

    /// Copy every cached CSV series into DuckDB
    ImportCsv {
        /// Cache directory (default: storage.cache_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show DuckDB statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,

    /// Scan one unit described on stdin (used by the process backend)
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "platform_scanner=info,warn",
        1 => "platform_scanner=debug,info",
        _ => "trace",
    };

    // stdout carries worker payloads, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::new(filter))
        .init();

    if let Command::Worker = cli.command {
        return pipeline::worker::run_worker(std::io::stdin().lock(), std::io::stdout().lock());
    }

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scan { backend, parallelism, output, no_export, symbol } => {
            let _t = utils::Timer::start("Platform scan");
            let store = config.store_source().open()?;

            let mut units = store.discover_units()?;
            if !symbol.is_empty() {
                units.retain(|u| symbol.contains(&u.symbol));
            }
            if units.is_empty() {
                warn!("No units to scan in {:?}", config.store_source());
                return Ok(());
            }

            let classifier = Arc::new(PlatformClassifier::new(config.platform.clone())?);
            let mut options = config.scan_options();
            if let Some(b) = backend {
                options.backend = b;
            }
            if let Some(p) = parallelism {
                options.parallelism = p;
            }

            let mut progress = LogProgress::new(50);
            let summary = BatchScanner::new(classifier, options)
                .run(units, store, Some(&mut progress))
                .await?;

            print_summary(&summary);

            if config.output.enabled && !no_export {
                let dir = output.unwrap_or_else(|| config.output.dir.clone());
                export::write_results(&dir, &summary, config.output.only_platform)?;
            }
        }

        Command::Inspect { symbol, start, end, json } => {
            let store = config.store_source().open()?;
            let classifier = PlatformClassifier::new(config.platform.clone())?;
            let unit = ScanUnit::new(symbol, start, end);

            let result = match scan_unit(store.as_ref(), &classifier, &unit) {
                ScanOutcome::Success(r) => r,
                ScanOutcome::Failure { error, .. } => {
                    return Err(error).with_context(|| format!("Inspecting {}", unit));
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("─────────────────────────────────");
                println!("  {}", unit);
                println!("─────────────────────────────────");
                println!("  Days      : {}", result.total_days);
                println!("  Platform  : {} ({:.2}%)", result.platform_days, result.platform_percentage);
                println!("  Coverage  : {}", utils::pct_bar(result.platform_percentage, 30));
                let periods = result.periods();
                if periods.is_empty() {
                    println!("  No platform periods.");
                }
                for p in periods {
                    println!("  {} → {}  ({} days)", p.start, p.end, p.days);
                }
                println!("─────────────────────────────────");
            }
        }

        Command::Units => {
            let store = config.store_source().open()?;
            let units = store.discover_units()?;
            if units.is_empty() {
                println!("No units — populate {:?} first.", config.store_source());
            } else {
                println!("{} units:", units.len());
                for u in &units {
                    println!("  {}", u);
                }
            }
        }

        Command::ImportCsv { dir } => {
            let _t = utils::Timer::start("CSV import");
            let cache = CsvCacheStore::new(dir.unwrap_or_else(|| config.storage.cache_dir.clone()));
            let repo = Repository::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }

            let units = cache.discover_units()?;
            info!("Found {} cached series in {:?}", units.len(), cache.dir());

            let mut total_bars = 0usize;
            let mut errors = 0usize;

            for unit in &units {
                match cache.fetch(&unit.symbol, unit.start_date, unit.end_date) {
                    Ok(series) => total_bars += repo.upsert_bars(&unit.symbol, series.bars())?,
                    Err(e) => {
                        warn!("{}: {}", unit, e);
                        errors += 1;
                    }
                }
            }

            info!("Done: {} bars imported, {} errors", total_bars, errors);
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let bars = repo.bar_count()?;
            let symbols = repo.symbol_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Platform scanner — Database Stats");
            println!("─────────────────────────────────");
            println!("  Symbols  : {}", utils::fmt_number(symbols));
            println!("  EOD bars : {}", utils::fmt_number(bars));
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }

        Command::Worker => unreachable!("handled before config load"),
    }

    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    let mut found: Vec<_> = summary
        .outcomes
        .iter()
        .filter(|o| o.has_platform())
        .filter_map(|o| o.result())
        .collect();
    found.sort_by(|a, b| b.platform_percentage.total_cmp(&a.platform_percentage));

    println!("─────────────────────────────────");
    println!("  Platform scan ({} backend)", summary.backend);
    println!("─────────────────────────────────");
    println!("  Units     : {}", summary.total);
    println!("  OK        : {}", summary.success_count);
    println!("  Errors    : {}", summary.error_count);
    println!("  Platform  : {}", summary.platform_found_count);
    println!("─────────────────────────────────");
    for r in found.iter().take(20) {
        println!(
            "  {:<12} {} → {}  {:>4}/{:<4} {:>6.2}%",
            r.symbol, r.start_date, r.end_date, r.platform_days, r.total_days, r.platform_percentage
        );
    }
    if found.len() > 20 {
        println!("  … {} more", found.len() - 20);
    }
}
