//! Ripple-Crawl main entry point
//!
//! This is the command-line interface for the Ripple-Crawl crawler engine.

use anyhow::{bail, Context};
use clap::Parser;
use ripple_crawl::config::{load_config_with_hash, Config, FrontierConfig};
use ripple_crawl::frontier::{open_frontier, RelationalFrontier, RetrySchedule};
use ripple_crawl::url::CrawlUrl;
use ripple_crawl::{CrawlEvent, CrawlerBuilder, Frontier};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

/// Ripple-Crawl: a polite, resumable web crawler
///
/// Ripple-Crawl fetches pages at a fixed aggregate rate while respecting
/// robots.txt, follows the links its content handlers discover, and keeps
/// its frontier in memory, SQLite or Redis so a crawl can be resumed or
/// shared between workers.
#[derive(Parser, Debug)]
#[command(name = "ripple-crawl")]
#[command(version)]
#[command(about = "A polite, resumable web crawler", long_about = None)]
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

    /// Clear the SQLite frontier before crawling
    #[arg(long)]
    fresh: bool,

    /// Additional seed URL (repeatable)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Exit once no URL is eligible and nothing is in flight
    #[arg(long)]
    exit_when_exhausted: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show frontier statistics from the SQLite database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    config.seeds.extend(cli.seeds.iter().cloned());
    if cli.fresh {
        apply_fresh(&mut config);
    }

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config, cli.exit_when_exhausted).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_crawl=info,warn"),
            1 => EnvFilter::new("ripple_crawl=debug,info"),
            2 => EnvFilter::new("ripple_crawl=trace,debug"),
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

fn apply_fresh(config: &mut Config) {
    match &mut config.frontier {
        FrontierConfig::Sqlite { reset, .. } => {
            tracing::info!("Starting fresh crawl (clearing frontier)");
            *reset = true;
        }
        FrontierConfig::Memory => {}
        FrontierConfig::Redis { .. } => {
            tracing::warn!("--fresh has no effect on a shared Redis frontier");
        }
    }
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Ripple-Crawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Interval: {}ms", config.crawler.interval_ms);
    println!("  Concurrency limit: {}", config.crawler.concurrency_limit);
    println!("  Recrawl interval: {}ms", config.crawler.recrawl_interval_ms);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nRobots:");
    println!("  Enabled: {}", config.robots.enabled);
    println!("  Cache time: {}ms", config.robots.cache_time_ms);
    println!("  Ignore server error: {}", config.robots.ignore_server_error);

    println!("\nFrontier:");
    println!("  Backend: {}", config.frontier.backend_name());
    match &config.frontier {
        FrontierConfig::Memory => {}
        FrontierConfig::Sqlite {
            database_path,
            reset,
            ..
        } => {
            println!("  Database: {}", database_path.display());
            println!("  Reset on open: {}", reset);
        }
        FrontierConfig::Redis {
            url, key_prefix, ..
        } => {
            println!("  Server: {}", url);
            println!("  Key prefix: {}", key_prefix);
        }
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        let parsed = CrawlUrl::parse(seed)?;
        println!("  - {}", parsed);
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling with {} seed URLs", config.seeds.len());

    Ok(())
}

/// Handles the --stats mode: shows frontier statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let database_path = match &config.frontier {
        FrontierConfig::Sqlite { database_path, .. } => database_path,
        other => bail!(
            "--stats needs the sqlite frontier, configured backend is {}",
            other.backend_name()
        ),
    };

    println!("Database: {}\n", database_path.display());

    let frontier = RelationalFrontier::open(database_path, RetrySchedule::default())?;
    let stats = frontier.stats()?;

    println!("=== Frontier Statistics ===");
    println!("  Total URLs:     {}", stats.total);
    println!("  Never crawled:  {}", stats.pending);
    println!("  Succeeded:      {}", stats.succeeded);
    println!("  Failed:         {}", stats.failed);
    println!("  Eligible now:   {}", stats.eligible_now);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, exit_when_exhausted: bool) -> anyhow::Result<()> {
    let recrawl_interval = Duration::from_millis(config.crawler.recrawl_interval_ms);
    let frontier = open_frontier(&config.frontier, recrawl_interval).await?;

    let seeds = config
        .seeds
        .iter()
        .map(|seed| CrawlUrl::parse(seed))
        .collect::<Result<Vec<_>, _>>()?;
    frontier.insert_if_not_exists_bulk(&seeds).await?;
    tracing::info!("Total seed URLs: {}", seeds.len());

    let crawler = CrawlerBuilder::from_config(&config)?
        .frontier(frontier)
        .build()?;

    let logger = tokio::spawn(log_events(crawler.subscribe()));

    if exit_when_exhausted {
        tokio::select! {
            result = crawler.run_until_exhausted() => result?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, waiting for in-flight work");
                crawler.shutdown().await;
            }
        }
    } else {
        crawler.start();
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Interrupted, waiting for in-flight work");
        crawler.shutdown().await;
    }

    logger.abort();
    tracing::info!("Crawl stopped");
    Ok(())
}

/// Mirrors crawler events into the log
async fn log_events(mut events: UnboundedReceiver<CrawlEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            CrawlEvent::CrawlUrl(url) => tracing::debug!("Crawling {}", url),
            CrawlEvent::UrlCrawled {
                url,
                error_code: None,
                status_code,
            } => tracing::info!("Crawled {} ({:?})", url, status_code),
            CrawlEvent::UrlCrawled {
                url,
                error_code: Some(code),
                status_code,
            } => tracing::warn!("Failed {} with {} ({:?})", url, code, status_code),
            CrawlEvent::Links { url, links } => {
                tracing::debug!("Found {} links on {}", links.len(), url)
            }
            CrawlEvent::FrontierEmpty => tracing::trace!("Nothing eligible"),
            CrawlEvent::FrontierExhausted => tracing::info!("Frontier exhausted"),
            CrawlEvent::HandlersError { url, message } => {
                tracing::warn!("Handler failed on {}: {}", url, message)
            }
            CrawlEvent::TransportError { url, message } => {
                tracing::warn!("Request to {} failed: {}", url, message)
            }
            CrawlEvent::Redirect { from, to } => tracing::debug!("{} redirects to {}", from, to),
            CrawlEvent::FrontierError { message } => {
                tracing::error!("Frontier error: {}", message)
            }
        }
    }
}
