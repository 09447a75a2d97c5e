//! Screep main entry point
//!
//! This is the command-line interface for the Screep sitemap scraper.

use anyhow::Context;
use clap::{Parser, Subcommand};
use chrono::Utc;
use screep::config::{load_config_with_hash, CachedConfig, Config};
use screep::storage::{DomainRegistry, SqliteStorage};
use screep::{CrawlReport, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Screep: a sitemap-driven scraper
///
/// Screep crawls registered domains through the sitemaps declared in their
/// robots.txt, extracts fields with per-domain XPath rules and stores one
/// record per page URL.
#[derive(Parser, Debug)]
#[command(name = "screep")]
#[command(version = "1.0.0")]
#[command(about = "A sitemap-driven scraper", long_about = None)]
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

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl every stale domain
    Crawl,

    /// Crawl one registered domain now, ignoring its TTL
    CrawlDomain {
        #[arg(value_name = "HOST")]
        domain: String,
    },

    /// List the domains the next crawl would visit
    Stale,

    /// Manage registered domains
    #[command(subcommand)]
    Domain(DomainCommand),

    /// Manage extraction rules
    #[command(subcommand)]
    Rule(RuleCommand),

    /// Manage runtime configuration values
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum DomainCommand {
    /// Register a domain for crawling
    Add {
        #[arg(value_name = "HOST")]
        domain: String,

        /// Display name, defaults to the host
        #[arg(long)]
        name: Option<String>,

        /// Hours between crawls
        #[arg(long, default_value_t = 24)]
        ttl: u32,
    },

    /// Show every registered domain
    List,
}

#[derive(Subcommand, Debug)]
enum RuleCommand {
    /// Add an XPath extraction rule to a domain
    Add {
        #[arg(value_name = "HOST")]
        domain: String,
        #[arg(value_name = "FIELD")]
        field: String,
        #[arg(value_name = "EXPRESSION")]
        expression: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Store a configuration value (e.g. USERAGENT, TIMEOUT)
    Set {
        #[arg(value_name = "KEY")]
        key: String,
        #[arg(value_name = "VALUE")]
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    match cli.command {
        Command::Crawl => handle_crawl(&config).await,
        Command::CrawlDomain { domain } => handle_crawl_domain(&config, &domain).await,
        Command::Stale => handle_stale(&config),
        Command::Domain(command) => handle_domain(&config, command),
        Command::Rule(RuleCommand::Add {
            domain,
            field,
            expression,
        }) => {
            let mut storage = open_registry(&config)?;
            storage
                .add_extraction_rule(&domain, &field, &expression)
                .with_context(|| format!("cannot add rule '{}' to {}", field, domain))?;
            println!("✓ Rule '{}' added to {}", field, domain);
            Ok(())
        }
        Command::Config(ConfigCommand::Set { key, value }) => {
            let storage = Arc::new(Mutex::new(open_registry(&config)?));
            let cache = CachedConfig::new(storage, config.crawler.config_cache_ttl());
            cache.set(&key, &value)?;
            println!("✓ {} = {}", key, value);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("screep=info,warn"),
            1 => EnvFilter::new("screep=debug,info"),
            2 => EnvFilter::new("screep=trace,debug"),
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

fn open_registry(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = Path::new(&config.storage.database_path);
    SqliteStorage::new(path).with_context(|| format!("cannot open database {}", path.display()))
}

/// Runs one orchestration pass over the stale domains
async fn handle_crawl(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::open(config)?;
    let summary = orchestrator.run_pass().await?;

    println!("=== Crawl Pass ===\n");
    for report in &summary.reports {
        print_report(report);
    }
    for (domain, kind) in &summary.failures {
        println!("✗ {} ({})", domain, kind);
    }
    println!(
        "\n{} domain(s): {} ok, {} failed",
        summary.domains(),
        summary.reports.len(),
        summary.failures.len()
    );

    Ok(())
}

async fn handle_crawl_domain(config: &Config, domain: &str) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::open(config)?;
    let report = orchestrator
        .crawl_domain(domain)
        .await
        .with_context(|| format!("crawl of {} failed", domain))?;
    print_report(&report);
    Ok(())
}

fn handle_stale(config: &Config) -> anyhow::Result<()> {
    let storage = open_registry(config)?;
    let stale = storage.stale_domains(Utc::now())?;

    println!("Stale domains ({}):", stale.len());
    for domain in &stale {
        println!(
            "  - {} ({}, last crawl {})",
            domain.domain,
            domain.status.as_str(),
            domain.last_crawl.to_rfc3339()
        );
    }
    Ok(())
}

fn handle_domain(config: &Config, command: DomainCommand) -> anyhow::Result<()> {
    let mut storage = open_registry(config)?;

    match command {
        DomainCommand::Add { domain, name, ttl } => {
            let name = name.unwrap_or_else(|| domain.clone());
            storage
                .add_domain(&domain, &name, ttl)
                .with_context(|| format!("cannot register {}", domain))?;
            println!("✓ Registered {} (ttl {}h)", domain, ttl);
        }
        DomainCommand::List => {
            let domains = storage.list_domains()?;
            println!("Domains ({}):", domains.len());
            for domain in &domains {
                let rules = storage.extraction_rules(&domain.domain)?;
                println!(
                    "  - {} [{}] ttl {}h, {} rule(s), last crawl {}",
                    domain.domain,
                    domain.status.as_str(),
                    domain.ttl_hours,
                    rules.len(),
                    domain.last_crawl.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

fn print_report(report: &CrawlReport) {
    println!(
        "✓ {}: {} queued, {} fetched, {} failed ({} timed out), {} updated, {} inserted in {:.1}s",
        report.domain,
        report.jobs_queued,
        report.pages_fetched,
        report.pages_failed,
        report.pages_timed_out,
        report.records_updated,
        report.records_inserted,
        report.duration.as_secs_f64()
    );
}
