//! Listing Harvester main entry point
//!
//! This is the command-line interface for the resumable listing crawler.

use anyhow::Context;
use clap::Parser;
use listing_harvester::config::{load_config_with_hash, Config, SourceConfig};
use listing_harvester::output::{print_report, RunReport};
use listing_harvester::pipeline::{Harvester, OutputLayout, RunMode};
use listing_harvester::source::{ListingTemplate, Partition};
use listing_harvester::{Fetcher, HarvestError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Listing Harvester: a resumable listing crawler
///
/// Discovers listing identifiers from paginated search pages, collects the
/// detail of every identifier, and checkpoints progress so an interrupted
/// run continues where it stopped.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(version = "1.0.0")]
#[command(about = "A resumable listing crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Only run the named source (repeatable)
    #[arg(short, long = "source", value_name = "NAME")]
    sources: Vec<String>,

    /// Discover identifiers without collecting details
    #[arg(long, conflicts_with = "collect_only")]
    discover_only: bool,

    /// Collect details of already discovered identifiers
    #[arg(long, conflicts_with = "discover_only")]
    collect_only: bool,

    /// Ignore existing identifier stores and crash snapshots
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be fetched without fetching
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.discover_only {
            RunMode::Discover
        } else if self.collect_only {
            RunMode::Collect
        } else {
            RunMode::Full
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let sources = select_sources(&config, &cli.sources)?;

    if cli.dry_run {
        handle_dry_run(&config, &sources);
    } else {
        handle_run(&config, &sources, cli.mode(), cli.fresh, cli.quiet).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_harvester=info,warn"),
            1 => EnvFilter::new("listing_harvester=debug,info"),
            2 => EnvFilter::new("listing_harvester=trace,debug"),
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

/// Resolves `--source` names; no names selects every source
fn select_sources<'a>(
    config: &'a Config,
    names: &[String],
) -> Result<Vec<&'a SourceConfig>, HarvestError> {
    if names.is_empty() {
        return Ok(config.sources.iter().collect());
    }

    names
        .iter()
        .map(|name| {
            config
                .source(name)
                .ok_or_else(|| HarvestError::UnknownSource(name.clone()))
        })
        .collect()
}

/// Handles the --dry-run mode: shows sources, partitions and paths
fn handle_dry_run(config: &Config, sources: &[&SourceConfig]) {
    println!("=== Listing Harvester Dry Run ===\n");

    println!("Requests:");
    println!("  Use proxy: {}", config.requests.use_proxy);
    println!("  Max attempts: {}", config.requests.max_attempts);
    println!("  Sleep between requests: {}ms", config.requests.sleep_time_ms);
    println!("  Timeout: {}s", config.requests.timeout_secs);
    if config.requests.proxies.is_empty() {
        println!("  Proxy list: {}", config.requests.proxy_list_url);
    } else {
        println!("  Static proxies: {}", config.requests.proxies.len());
    }

    println!("\nOutput:");
    println!("  Root: {}", config.output.root);
    println!("  Snapshot interval: {}", config.output.snapshot_interval);
    match config.output.batch_size {
        Some(size) => println!("  Batch size: {}", size),
        None => println!("  Batch size: unlimited"),
    }

    let layout = OutputLayout::today(&config.output.root);
    let mut total_partitions = 0;

    for source in sources {
        let partitions = Partition::expand(&source.dimensions);
        total_partitions += partitions.len();
        let listing = ListingTemplate::from_config(source);

        println!(
            "\nSource {} ({:?}, pages {}..={}):",
            source.name,
            source.kind,
            source.from_page,
            source.from_page.saturating_add(source.pages.saturating_sub(1))
        );
        for partition in &partitions {
            let paths = layout.partition_paths(source, partition);
            println!("  - {}", partition);
            println!("    * first page: {}", listing.url(source.from_page, partition));
            println!("    * identifiers: {}", paths.ids.display());
            println!("    * results: {}", paths.results.display());
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would harvest {} source(s) over {} partition(s)",
        sources.len(),
        total_partitions
    );
}

/// Handles the main harvest operation
async fn handle_run(
    config: &Config,
    sources: &[&SourceConfig],
    mode: RunMode,
    fresh: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh run (ignoring previous identifiers)");
    } else {
        tracing::info!("Starting run (will resume if an interrupted run exists)");
    }

    let started_at = chrono::Local::now();
    let fetcher = Arc::new(
        Fetcher::from_config(&config.requests).context("failed to build the fetch layer")?,
    );
    let harvester = Harvester::new(
        Arc::clone(&fetcher),
        OutputLayout::today(&config.output.root),
        config.output.clone(),
    )
    .fresh(fresh);

    let mut reports = Vec::with_capacity(sources.len());
    for source in sources {
        let report = harvester
            .run(source, mode)
            .await
            .with_context(|| format!("source {} failed", source.name))?;
        reports.push(report);
    }

    tracing::info!("Harvest completed successfully");

    if !quiet {
        print_report(&RunReport {
            started_at,
            finished_at: chrono::Local::now(),
            sources: reports,
            fetch: fetcher.stats(),
        });
    }

    Ok(())
}
