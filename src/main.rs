//! Händler-Scout main entry point
//!
//! This is the command-line interface for the bioladen.de retailer crawler.

use anyhow::Context;
use clap::Parser;
use haendler_scout::config::{load_config_with_hash, Config};
use haendler_scout::crawler::{crawl, RunReport};
use haendler_scout::output::{
    export_json_lines, generate_markdown_summary, load_statistics, print_statistics,
};
use haendler_scout::postal::load_postal_codes;
use haendler_scout::storage::SqliteStorage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Number of postal codes listed by --dry-run
const DRY_RUN_PREVIEW: usize = 10;

/// Händler-Scout: a postal-code driven retailer locator crawler
///
/// Händler-Scout walks a list of German postal codes, runs the retailer
/// search on bioladen.de for each one in a headless browser and stores every
/// listed retailer at most once per run.
#[derive(Parser, Debug)]
#[command(name = "haendler-scout")]
#[command(version)]
#[command(about = "A postal-code driven retailer locator crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted run (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh run, ignoring previous state
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show which postal codes would be searched
    #[arg(long, conflicts_with_all = ["stats", "export_json", "export_summary"])]
    dry_run: bool,

    /// Show statistics of the latest run and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export_json", "export_summary"])]
    stats: bool,

    /// Write the records of the latest run as JSON lines and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dry_run", "stats"])]
    export_json: Option<PathBuf>,

    /// Write a markdown summary of the latest run and exit
    #[arg(long, value_name = "PATH", conflicts_with_all = ["dry_run", "stats"])]
    export_summary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        return handle_dry_run(&config);
    }
    if cli.stats {
        return handle_stats(&config);
    }
    if cli.export_json.is_some() || cli.export_summary.is_some() {
        return handle_exports(
            &config,
            cli.export_json.as_deref(),
            cli.export_summary.as_deref(),
        );
    }

    handle_crawl(config, &config_hash, cli.fresh).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("haendler_scout=info,warn"),
            1 => EnvFilter::new("haendler_scout=debug,info"),
            2 => EnvFilter::new("haendler_scout=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and lists the postal codes
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Händler-Scout Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Start URL: {}", config.crawler.start_url);
    println!("  Radius: {} km", config.crawler.radius_km);
    println!("  Deduplicate by: {:?}", config.crawler.deduplicate_by);
    println!("  Max concurrency: {}", config.crawler.max_concurrency);
    println!("  Scroll steps: {}", config.crawler.scroll_steps);

    println!("\nBrowser:");
    println!("  Headless: {}", config.browser.headless);
    if let Some(executable) = &config.browser.executable {
        println!("  Executable: {}", executable);
    }
    println!(
        "  Navigation timeout: {}s",
        config.browser.navigation_timeout_secs
    );
    println!(
        "  Per-code timeout: {}s",
        config.browser.request_handler_timeout_secs
    );

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Diagnostics: {}", config.output.diagnostics_dir);

    let codes = load_postal_codes(&config.postal_codes)?;
    println!(
        "\nPostal Codes ({}, {:?} mode):",
        codes.len(),
        config.postal_codes.mode
    );
    for code in codes.iter().take(DRY_RUN_PREVIEW) {
        println!("  - {}", code);
    }
    if codes.len() > DRY_RUN_PREVIEW {
        println!("  ... and {} more", codes.len() - DRY_RUN_PREVIEW);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would search {} postal codes", codes.len());

    Ok(())
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.output.database_path);
    SqliteStorage::new(path).with_context(|| format!("failed to open {}", path.display()))
}

/// Handles the --stats mode: shows statistics of the latest run
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(config)?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles --export-json and --export-summary, both read the latest run
fn handle_exports(
    config: &Config,
    json_path: Option<&Path>,
    summary_path: Option<&Path>,
) -> anyhow::Result<()> {
    println!("=== Exporting Run Data ===\n");
    println!("Database: {}", config.output.database_path);

    let storage = open_storage(config)?;
    let stats = load_statistics(&storage)?;

    if let Some(path) = json_path {
        let written = export_json_lines(&storage, stats.run.id, path)?;
        println!("✓ {} records exported to: {}", written, path.display());
    }

    if let Some(path) = summary_path {
        tracing::info!("Generating markdown summary...");
        generate_markdown_summary(&stats, path)?;
        println!("✓ Summary exported to: {}", path.display());
    }

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh run (ignoring previous state)");
    } else {
        tracing::info!("Starting run (will resume if an interrupted run exists)");
    }

    let report = crawl(config, config_hash, fresh).await.map_err(|e| {
        tracing::error!("Crawl failed: {}", e);
        e
    })?;
    print_report(&report);

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n=== Run {} Finished ===\n", report.run_id);
    println!("  Postal codes searched: {}", report.sessions.len());
    if report.skipped > 0 {
        println!("  Skipped (already done): {}", report.skipped);
    }
    println!("  Retailers saved: {}", report.total_kept());
    println!("  Dropped as duplicates: {}", report.total_dropped());
    println!("  Failed sessions: {}", report.failed());
}
