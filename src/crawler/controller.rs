//! Domain controller - one complete crawl of one domain
//!
//! The controller sequences the stages of a domain crawl:
//! - Fetching the robots policy and aborting if the crawl identity is banned
//! - Checking that every extraction field is bound in the record sink
//! - Expanding the declared sitemaps into page jobs
//! - Running the worker pool and the consolidator side by side
//! - Writing the terminal status back to the domain registry

use crate::config::CrawlerConfig;
use crate::crawler::consolidator::{ConsolidationStats, Consolidator};
use crate::crawler::fetcher::{HttpPageFetcher, PageFetch};
use crate::crawler::job::{can_use_head, Job};
use crate::crawler::scheduler::{concurrency_for, PoolStats, WorkerPool};
use crate::robots::PolicyFetcher;
use crate::sitemap::SitemapExpander;
use crate::storage::{DomainRegistry, DomainStatus, RecordSink};
use crate::{CrawlError, Result};
use chrono::Utc;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Summary of one domain crawl
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlReport {
    pub domain: String,
    pub jobs_queued: usize,
    pub pages_fetched: usize,
    /// Failed page jobs, timeouts included
    pub pages_failed: usize,
    pub pages_timed_out: usize,
    pub records_updated: usize,
    pub records_inserted: usize,
    pub flushes: usize,
    pub concurrency: usize,
    pub duration: Duration,
}

impl CrawlReport {
    fn new(domain: &str, jobs_queued: usize, concurrency: usize) -> Self {
        Self {
            domain: domain.to_string(),
            jobs_queued,
            pages_fetched: 0,
            pages_failed: 0,
            pages_timed_out: 0,
            records_updated: 0,
            records_inserted: 0,
            flushes: 0,
            concurrency,
            duration: Duration::ZERO,
        }
    }

    fn record_pool(&mut self, stats: PoolStats) {
        self.pages_fetched = stats.fetched;
        self.pages_failed = stats.failed;
        self.pages_timed_out = stats.timed_out;
    }

    fn record_consolidation(&mut self, stats: ConsolidationStats) {
        self.records_updated = stats.updated;
        self.records_inserted = stats.inserted;
        self.flushes = stats.flushes;
    }

    /// Fraction of queued jobs that failed, 0.0 for an empty crawl
    pub fn failure_rate(&self) -> f64 {
        if self.jobs_queued == 0 {
            0.0
        } else {
            self.pages_failed as f64 / self.jobs_queued as f64
        }
    }
}

/// Runs the crawl pipeline for single domains
pub struct DomainController<R, S> {
    registry: Arc<Mutex<R>>,
    sink: Arc<Mutex<S>>,
    settings: CrawlerConfig,
    user_agent: String,
    client: Client,
    fetcher: Arc<dyn PageFetch>,
}

impl<R, S> DomainController<R, S>
where
    R: DomainRegistry + Send + 'static,
    S: RecordSink + Send + 'static,
{
    /// Creates a controller that fetches pages over `client`
    pub fn new(
        registry: Arc<Mutex<R>>,
        sink: Arc<Mutex<S>>,
        settings: CrawlerConfig,
        user_agent: impl Into<String>,
        client: Client,
    ) -> Self {
        let fetcher: Arc<dyn PageFetch> = Arc::new(HttpPageFetcher::new(client.clone()));
        Self {
            registry,
            sink,
            settings,
            user_agent: user_agent.into(),
            client,
            fetcher,
        }
    }

    /// Replaces the page fetcher; robots and sitemaps still use the HTTP client
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Crawls a domain and records the outcome in the registry
    ///
    /// | Outcome | Status | Last crawl |
    /// |---------|--------|------------|
    /// | success within the failure-rate limit | ok | now |
    /// | success above the failure-rate limit | error | now |
    /// | access denied by robots.txt | error | now |
    /// | any other error | error | unchanged |
    pub async fn run(&self, domain: &str) -> Result<CrawlReport> {
        tracing::info!(domain = %domain, "Starting domain crawl");
        let outcome = self.crawl(domain).await;
        let now = Utc::now();

        let (status, last_crawl) = match &outcome {
            Ok(report) if report.failure_rate() <= self.settings.max_failure_rate => {
                tracing::info!(
                    domain = %domain,
                    jobs = report.jobs_queued,
                    fetched = report.pages_fetched,
                    failed = report.pages_failed,
                    updated = report.records_updated,
                    inserted = report.records_inserted,
                    duration = ?report.duration,
                    "Domain crawl complete"
                );
                (DomainStatus::Ok, Some(now))
            }
            Ok(report) => {
                tracing::warn!(
                    domain = %domain,
                    failure_rate = report.failure_rate(),
                    limit = self.settings.max_failure_rate,
                    duration = ?report.duration,
                    "Domain crawl finished with too many failed pages"
                );
                (DomainStatus::Error, Some(now))
            }
            Err(e @ CrawlError::AccessDenied { .. }) => {
                tracing::warn!(domain = %domain, kind = e.kind(), error = %e, "Domain crawl refused");
                (DomainStatus::Error, Some(now))
            }
            Err(e) => {
                tracing::error!(domain = %domain, kind = e.kind(), error = %e, "Domain crawl failed");
                (DomainStatus::Error, None)
            }
        };

        let write_back = self
            .registry
            .lock()
            .unwrap()
            .update_crawl_status(domain, status, last_crawl);
        if let Err(e) = write_back {
            tracing::error!(domain = %domain, error = %e, "Failed to record crawl status");
        }

        outcome
    }

    /// Runs every stage for one domain without touching its registry status
    pub async fn crawl(&self, domain: &str) -> Result<CrawlReport> {
        let started = Instant::now();

        // Stage 1: robots policy
        let policy = PolicyFetcher::new(self.client.clone(), self.user_agent.clone())
            .fetch(domain)
            .await?;
        if policy.banned {
            return Err(CrawlError::AccessDenied {
                domain: domain.to_string(),
                user_agent: self.user_agent.clone(),
            });
        }

        // Stage 2: extraction rules and sink binding
        let rules = self.registry.lock().unwrap().extraction_rules(domain)?;
        self.check_sink_fields(domain, rules.keys())?;
        let head_only = can_use_head(&rules);
        let rules = Arc::new(rules);

        // Stage 3: sitemaps
        if policy.sitemaps.is_empty() {
            tracing::warn!(domain = %domain, "Robots policy declares no sitemaps");
        }
        let expander = SitemapExpander::new(self.client.clone(), self.settings.sitemap_timeout());
        let mut seen_sitemaps = HashSet::new();
        let urls = expander.expand(&policy.sitemaps, &mut seen_sitemaps).await?;

        let jobs_queued = urls.len();
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        for url in urls {
            // The receiver is held below, so sending cannot fail
            let _ = job_tx.send(Job::new(url, Arc::clone(&rules), head_only));
        }
        drop(job_tx);

        // Stage 4: fetch and consolidate
        let concurrency = concurrency_for(policy.crawl_delay, self.settings.default_concurrency);
        tracing::info!(
            domain = %domain,
            jobs = jobs_queued,
            concurrency,
            head_only,
            "Fetching pages"
        );

        let (result_tx, result_rx) = mpsc::channel(self.settings.batch_size.max(1));
        let consolidator = Consolidator::new(Arc::clone(&self.sink), self.settings.batch_size);
        let consolidation = tokio::spawn(consolidator.run(result_rx));

        let pool = WorkerPool::new(
            Arc::clone(&self.fetcher),
            concurrency,
            self.settings.job_timeout(),
        );
        let pool_stats = pool.run(job_rx, result_tx).await;

        let consolidation_stats = consolidation.await??;

        let mut report = CrawlReport::new(domain, jobs_queued, concurrency);
        report.record_pool(pool_stats);
        report.record_consolidation(consolidation_stats);
        report.duration = started.elapsed();
        Ok(report)
    }

    fn check_sink_fields<'a>(
        &self,
        domain: &str,
        fields: impl Iterator<Item = &'a String>,
    ) -> Result<()> {
        let bound: HashSet<String> = self.sink.lock().unwrap().field_names().into_iter().collect();
        let unbound: Vec<&str> = fields
            .filter(|f| !bound.contains(*f))
            .map(String::as_str)
            .collect();

        if unbound.is_empty() {
            Ok(())
        } else {
            Err(CrawlError::SchemaMismatch(format!(
                "record sink has no column for {} field(s) of {}: {}",
                unbound.len(),
                domain,
                unbound.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(queued: usize, failed: usize) -> CrawlReport {
        let mut report = CrawlReport::new("example.com", queued, 4);
        report.pages_failed = failed;
        report
    }

    #[test]
    fn test_failure_rate() {
        assert_eq!(report(0, 0).failure_rate(), 0.0);
        assert_eq!(report(10, 4).failure_rate(), 0.4);
        assert_eq!(report(10, 10).failure_rate(), 1.0);
    }
}
