//! Crawl orchestration across domains
//!
//! The orchestrator is the composition root of a crawl pass: it owns the
//! runtime configuration cache, builds the HTTP client for the configured
//! crawl identity and runs one [`DomainController`] per stale domain, with a
//! bounded number of domains in flight.

use crate::config::{CachedConfig, Config, ConfigStore, CrawlerConfig};
use crate::crawler::controller::{CrawlReport, DomainController};
use crate::crawler::fetcher::{build_http_client, PageFetch};
use crate::storage::{DomainRecord, DomainRegistry, RecordSink, SqliteSink, SqliteStorage};
use crate::{ConfigError, CrawlError, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;

/// Outcome of a full orchestration pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassSummary {
    pub reports: Vec<CrawlReport>,
    /// (domain, error kind) for every domain that failed
    pub failures: Vec<(String, &'static str)>,
}

impl PassSummary {
    pub fn domains(&self) -> usize {
        self.reports.len() + self.failures.len()
    }
}

/// Selects stale domains and crawls them
pub struct Orchestrator<R, S> {
    registry: Arc<Mutex<R>>,
    sink: Arc<Mutex<S>>,
    config: CachedConfig<R>,
    settings: CrawlerConfig,
    fetcher: Option<Arc<dyn PageFetch>>,
}

impl Orchestrator<SqliteStorage, SqliteSink> {
    /// Opens the registry and record sink named in the configuration
    pub fn open(config: &Config) -> Result<Self> {
        let path = Path::new(&config.storage.database_path);
        let registry = SqliteStorage::new(path)?;
        let sink = SqliteSink::open(path, config.sink.clone())?;

        Ok(Self::new(
            Arc::new(Mutex::new(registry)),
            Arc::new(Mutex::new(sink)),
            config.crawler.clone(),
        ))
    }
}

impl<R, S> Orchestrator<R, S>
where
    R: DomainRegistry + ConfigStore + Send + 'static,
    S: RecordSink + Send + 'static,
{
    pub fn new(registry: Arc<Mutex<R>>, sink: Arc<Mutex<S>>, settings: CrawlerConfig) -> Self {
        let config = CachedConfig::new(Arc::clone(&registry), settings.config_cache_ttl());
        Self {
            registry,
            sink,
            config,
            settings,
            fetcher: None,
        }
    }

    /// Uses `fetcher` for page jobs instead of the HTTP page fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn registry(&self) -> Arc<Mutex<R>> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &CachedConfig<R> {
        &self.config
    }

    /// Builds a controller for the current crawl identity
    ///
    /// `USERAGENT` is required; `TIMEOUT` falls back to its default.
    pub fn controller(&self) -> Result<DomainController<R, S>> {
        let user_agent = self.config.user_agent()?;
        let timeout = self.config.fetch_timeout()?;

        let client = build_http_client(&user_agent, timeout, self.settings.max_redirects)
            .map_err(|e| {
                ConfigError::Validation(format!("cannot build HTTP client: {}", e))
            })?;

        let controller = DomainController::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
            self.settings.clone(),
            user_agent,
            client,
        );

        Ok(match &self.fetcher {
            Some(fetcher) => controller.with_fetcher(Arc::clone(fetcher)),
            None => controller,
        })
    }

    /// Domains due for a crawl right now
    pub fn stale_domains(&self) -> Result<Vec<DomainRecord>> {
        Ok(self.registry.lock().unwrap().stale_domains(Utc::now())?)
    }

    /// Crawls every stale domain, at most `max-active-domains` at a time
    ///
    /// Fails up front when no extraction rule exists or the crawl identity
    /// is not configured. Individual domain failures are collected in the
    /// summary and never stop the pass.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let rules = self.registry.lock().unwrap().count_extraction_rules()?;
        if rules == 0 {
            return Err(CrawlError::NoExtractionRules);
        }

        let controller = Arc::new(self.controller()?);
        let stale = self.stale_domains()?;
        let max_active = self.settings.max_active_domains.max(1);

        tracing::info!(
            stale = stale.len(),
            max_active,
            "Starting crawl pass"
        );

        let mut summary = PassSummary::default();
        let mut active: JoinSet<(String, Result<CrawlReport>)> = JoinSet::new();

        for domain in stale {
            // Admit a new domain only once a slot frees up
            while active.len() >= max_active {
                tracing::debug!(active = active.len(), "Waiting for a domain slot");
                collect(active.join_next().await, &mut summary);
            }

            let controller = Arc::clone(&controller);
            active.spawn(async move {
                let result = controller.run(&domain.domain).await;
                (domain.domain, result)
            });
        }

        while let Some(joined) = active.join_next().await {
            collect(Some(joined), &mut summary);
        }

        tracing::info!(
            domains = summary.domains(),
            succeeded = summary.reports.len(),
            failed = summary.failures.len(),
            "Crawl pass complete"
        );

        Ok(summary)
    }

    /// Crawls one registered domain regardless of its TTL
    pub async fn crawl_domain(&self, domain: &str) -> Result<CrawlReport> {
        if self.registry.lock().unwrap().get_domain(domain)?.is_none() {
            return Err(crate::storage::StorageError::DomainNotFound(domain.to_string()).into());
        }
        self.controller()?.run(domain).await
    }
}

type Joined = std::result::Result<(String, Result<CrawlReport>), tokio::task::JoinError>;

fn collect(joined: Option<Joined>, summary: &mut PassSummary) {
    match joined {
        Some(Ok((_, Ok(report)))) => summary.reports.push(report),
        Some(Ok((domain, Err(e)))) => summary.failures.push((domain, e.kind())),
        Some(Err(e)) => {
            tracing::error!(error = %e, "Domain crawl task panicked");
        }
        None => {}
    }
}
