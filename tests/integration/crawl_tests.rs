//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end against an on-disk SQLite database.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use screep::config::{Config, CrawlerConfig, SinkBinding, StorageConfig, USERAGENT};
use screep::crawler::{extract_fields, FieldMap, Job, PageFetch};
use screep::storage::{
    never_crawled, DomainRegistry, DomainStatus, RecordSink, SqliteSink, SqliteStorage,
    StorageError, StorageResult, StoredRecord,
};
use screep::{CrawlError, Orchestrator};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration storing everything in `dir`
fn create_test_config(dir: &TempDir) -> Config {
    config_with_fields(dir, &["title"])
}

/// Same as [`create_test_config`] with one sink column per field
fn config_with_fields(dir: &TempDir, names: &[&str]) -> Config {
    let fields: BTreeMap<String, String> = names
        .iter()
        .map(|name| (name.to_string(), name.to_string()))
        .collect();

    Config {
        crawler: CrawlerConfig {
            job_timeout_secs: 5,
            batch_size: 10,
            ..CrawlerConfig::default()
        },
        storage: StorageConfig {
            database_path: dir.path().join("screep.db").to_string_lossy().into_owned(),
        },
        sink: SinkBinding {
            table: "pages".to_string(),
            url_column: "url".to_string(),
            create_if_missing: true,
            fields,
        },
    }
}

/// Opens the orchestrator with a crawl identity already configured
fn open_orchestrator(config: &Config) -> Orchestrator<SqliteStorage, SqliteSink> {
    let orchestrator = Orchestrator::open(config).expect("Failed to open orchestrator");
    orchestrator
        .config()
        .set(USERAGENT, "TestBot/1.0 (+https://example.com/bot)")
        .unwrap();
    orchestrator
}

/// Host and port of the mock server, used as the registered domain
fn domain_of(server: &MockServer) -> String {
    server.address().to_string()
}

fn register<S: RecordSink + Send + 'static>(
    orchestrator: &Orchestrator<SqliteStorage, S>,
    domain: &str,
    rules: &[(&str, &str)],
) {
    let registry = orchestrator.registry();
    let mut registry = registry.lock().unwrap();
    registry.add_domain(domain, "Test Shop", 24).unwrap();
    for (field, expression) in rules {
        registry.add_extraction_rule(domain, field, expression).unwrap();
    }
}

fn stored_records(config: &Config, urls: &[String]) -> Vec<StoredRecord> {
    let sink = SqliteSink::open(
        std::path::Path::new(&config.storage.database_path),
        config.sink.clone(),
    )
    .unwrap();
    let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
    let mut records = sink.find_by_urls(&urls).unwrap();
    records.sort_by(|a, b| a.url.cmp(&b.url));
    records
}

async fn mount_page(server: &MockServer, page: &str, title: &str) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    "<html><head><title>{}</title></head><body><p>content</p></body></html>",
                    title
                ))
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Mounts robots.txt -> sitemap index -> urlset listing /a, /b and a missing /c
async fn mount_site(server: &MockServer, robots_extra: &str) {
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: *\nAllow: /\n{}\nSitemap: {}/sitemap.xml\n",
            robots_extra, base
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>{base}/pages.xml</loc></sitemap>
            </sitemapindex>"#
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/pages.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>{base}/a</loc></url>
              <url><loc>{base}/b</loc></url>
              <url><loc>{base}/c</loc></url>
            </urlset>"#
        )))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = MockServer::start().await;
    mount_site(&server, "").await;
    mount_page(&server, "/a", "Alpha").await;
    mount_page(&server, "/b", "Beta").await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("title", "//head/title/text()")]);

    let summary = orchestrator.run_pass().await.unwrap();

    assert!(summary.failures.is_empty());
    assert_eq!(summary.reports.len(), 1);
    let report = &summary.reports[0];
    assert_eq!(report.jobs_queued, 3);
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.pages_failed, 1);
    assert_eq!(report.records_inserted, 2);
    assert_eq!(report.records_updated, 0);
    assert_eq!(report.concurrency, 4);

    let base = server.uri();
    let records = stored_records(&config, &[format!("{}/a", base), format!("{}/b", base)]);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].fields["title"], "Alpha");
    assert_eq!(records[1].fields["title"], "Beta");

    // A successful crawl is recorded and is no longer stale
    let record = orchestrator.registry().lock().unwrap().get_domain(&domain).unwrap().unwrap();
    assert_eq!(record.status, DomainStatus::Ok);
    assert!(Utc::now() - record.last_crawl < ChronoDuration::minutes(5));
    assert!(orchestrator.stale_domains().unwrap().is_empty());
}

#[tokio::test]
async fn test_banned_domain_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: TestBot\nDisallow: /\n\nSitemap: {}/sitemap.xml\n",
            server.uri()
        )))
        .mount(&server)
        .await;
    mount_page(&server, "/a", "Alpha").await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("title", "//title/text()")]);

    let summary = orchestrator.run_pass().await.unwrap();

    assert!(summary.reports.is_empty());
    assert_eq!(summary.failures, vec![(domain.clone(), "access-denied")]);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/robots.txt");
    assert!(stored_records(&config, &[format!("{}/a", server.uri())]).is_empty());

    // Denied crawls are marked as errors but wait for the next TTL window
    let record = orchestrator.registry().lock().unwrap().get_domain(&domain).unwrap().unwrap();
    assert_eq!(record.status, DomainStatus::Error);
    assert!(orchestrator.stale_domains().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_domain_selection() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);
    let now = Utc::now();

    {
        let registry = orchestrator.registry();
        let mut registry = registry.lock().unwrap();
        registry.add_domain("old.example.com", "Old", 24).unwrap();
        registry.add_domain("fresh.example.com", "Fresh", 24).unwrap();
        registry
            .update_crawl_status("old.example.com", DomainStatus::Ok, Some(now - ChronoDuration::hours(48)))
            .unwrap();
        registry
            .update_crawl_status("fresh.example.com", DomainStatus::Ok, Some(now - ChronoDuration::hours(1)))
            .unwrap();
    }

    let stale: Vec<String> = orchestrator
        .stale_domains()
        .unwrap()
        .into_iter()
        .map(|d| d.domain)
        .collect();
    assert_eq!(stale, vec!["old.example.com".to_string()]);
}

#[tokio::test]
async fn test_recrawl_updates_existing_records() {
    let server = MockServer::start().await;
    mount_site(&server, "").await;
    mount_page(&server, "/a", "Alpha").await;
    mount_page(&server, "/b", "Beta").await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("title", "//title/text()")]);

    let first = orchestrator.crawl_domain(&domain).await.unwrap();
    assert_eq!(first.records_inserted, 2);

    server.reset().await;
    mount_site(&server, "").await;
    mount_page(&server, "/a", "Alpha").await;
    mount_page(&server, "/b", "Beta v2").await;

    let second = orchestrator.crawl_domain(&domain).await.unwrap();
    assert_eq!(second.records_inserted, 0);
    assert_eq!(second.records_updated, 2);

    let base = server.uri();
    let records = stored_records(&config, &[format!("{}/a", base), format!("{}/b", base)]);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].fields["title"], "Alpha");
    assert_eq!(records[1].fields["title"], "Beta v2");
}

#[tokio::test]
async fn test_missing_user_agent_stops_the_pass() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = Orchestrator::open(&config).unwrap();
    register(&orchestrator, "shop.example.com", &[("title", "//title/text()")]);

    let err = orchestrator.run_pass().await.unwrap_err();
    assert!(matches!(err, CrawlError::ConfigMissing(ref key) if key == USERAGENT));
}

#[tokio::test]
async fn test_no_extraction_rules_stops_the_pass() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);
    register(&orchestrator, "shop.example.com", &[]);

    let err = orchestrator.run_pass().await.unwrap_err();
    assert!(matches!(err, CrawlError::NoExtractionRules));
}

#[tokio::test]
async fn test_unbound_rule_field_fails_before_fetching() {
    let server = MockServer::start().await;
    mount_site(&server, "").await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("price", "//span[@class='price']")]);

    let err = orchestrator.crawl_domain(&domain).await.unwrap_err();
    assert!(matches!(err, CrawlError::SchemaMismatch(_)));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() == "/robots.txt"));

    let record = domain_record(&orchestrator, &domain);
    assert_eq!(record.status, DomainStatus::Error);
    assert_eq!(record.last_crawl, never_crawled());
}

#[tokio::test]
async fn test_unknown_domain_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);

    let err = orchestrator.crawl_domain("nowhere.example.com").await.unwrap_err();
    assert_eq!(err.kind(), "storage");
}

/// Page fetcher that records how many fetches overlap
struct PeakFetcher {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl PageFetch for PeakFetcher {
    async fn fetch(&self, job: &Job) -> Result<FieldMap, CrawlError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let html = format!("<html><head><title>{}</title></head></html>", job.url);
        extract_fields(&job.url, &html, &job.rules)
    }
}

#[tokio::test]
async fn test_crawl_delay_serializes_fetches() {
    let server = MockServer::start().await;
    mount_site(&server, "Crawl-delay: 2").await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let fetcher = Arc::new(PeakFetcher {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let orchestrator = open_orchestrator(&config).with_fetcher(fetcher.clone());
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("title", "//title/text()")]);

    let report = orchestrator.crawl_domain(&domain).await.unwrap();

    assert_eq!(report.concurrency, 1);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(report.records_inserted, 3);
    assert_eq!(fetcher.peak.load(Ordering::SeqCst), 1);
}

fn domain_record<S: RecordSink + Send + 'static>(
    orchestrator: &Orchestrator<SqliteStorage, S>,
    domain: &str,
) -> screep::DomainRecord {
    orchestrator
        .registry()
        .lock()
        .unwrap()
        .get_domain(domain)
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_crawl_over_failure_limit_is_an_error() {
    let server = MockServer::start().await;
    mount_site(&server, "").await;
    mount_page(&server, "/a", "Alpha").await;
    mount_page(&server, "/b", "Beta").await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir);
    config.crawler.max_failure_rate = 0.2;
    let orchestrator = open_orchestrator(&config);
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("title", "//title/text()")]);

    // One of three pages is missing
    let report = orchestrator.crawl_domain(&domain).await.unwrap();
    assert_eq!(report.pages_failed, 1);
    assert!(report.failure_rate() > 0.2);
    assert_eq!(report.records_inserted, 2);

    let record = domain_record(&orchestrator, &domain);
    assert_eq!(record.status, DomainStatus::Error);
    assert!(Utc::now() - record.last_crawl < ChronoDuration::minutes(5));
}

#[tokio::test]
async fn test_transport_failure_keeps_last_crawl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "User-agent: *\nAllow: /\nSitemap: {}/sitemap.xml\n",
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir);
    let orchestrator = open_orchestrator(&config);
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("title", "//title/text()")]);

    let summary = orchestrator.run_pass().await.unwrap();
    assert_eq!(summary.failures, vec![(domain.clone(), "transport")]);

    // Untouched timestamp means the next pass retries the domain
    let record = domain_record(&orchestrator, &domain);
    assert_eq!(record.status, DomainStatus::Error);
    assert_eq!(record.last_crawl, never_crawled());
    assert_eq!(orchestrator.stale_domains().unwrap().len(), 1);
}

/// Record sink whose backing store is gone
struct UnavailableSink;

impl RecordSink for UnavailableSink {
    fn field_names(&self) -> Vec<String> {
        vec!["title".to_string()]
    }

    fn find_by_urls(&self, _urls: &[&str]) -> StorageResult<Vec<StoredRecord>> {
        Err(StorageError::Database("disk I/O error".to_string()))
    }

    fn update_fields(&mut self, _url: &str, _fields: &FieldMap) -> StorageResult<()> {
        Err(StorageError::Database("disk I/O error".to_string()))
    }

    fn bulk_insert(&mut self, _records: &[StoredRecord]) -> StorageResult<()> {
        Err(StorageError::Database("disk I/O error".to_string()))
    }
}

#[tokio::test]
async fn test_sink_failure_fails_the_domain() {
    let server = MockServer::start().await;
    mount_site(&server, "").await;
    mount_page(&server, "/a", "Alpha").await;
    mount_page(&server, "/b", "Beta").await;

    let registry = Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()));
    let sink = Arc::new(Mutex::new(UnavailableSink));
    let settings = CrawlerConfig {
        job_timeout_secs: 5,
        batch_size: 10,
        ..CrawlerConfig::default()
    };
    let orchestrator = Orchestrator::new(registry, sink, settings);
    orchestrator.config().set(USERAGENT, "TestBot/1.0").unwrap();
    let domain = domain_of(&server);
    register(&orchestrator, &domain, &[("title", "//title/text()")]);

    let err = orchestrator.crawl_domain(&domain).await.unwrap_err();
    assert!(matches!(err, CrawlError::SinkUnavailable(_)));

    let record = domain_record(&orchestrator, &domain);
    assert_eq!(record.status, DomainStatus::Error);
    assert_eq!(record.last_crawl, never_crawled());
}

/// Page fetcher that tracks how many domains have fetches in flight
struct DomainOverlapFetcher {
    in_flight: Mutex<HashMap<String, usize>>,
    peak_domains: AtomicUsize,
    delay: Duration,
}

impl DomainOverlapFetcher {
    fn enter(&self, host: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        *in_flight.entry(host.to_string()).or_default() += 1;
        self.peak_domains.fetch_max(in_flight.len(), Ordering::SeqCst);
    }

    fn leave(&self, host: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(host) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(host);
            }
        }
    }
}

#[async_trait]
impl PageFetch for DomainOverlapFetcher {
    async fn fetch(&self, job: &Job) -> Result<FieldMap, CrawlError> {
        let parsed = url::Url::parse(&job.url).unwrap();
        let host = format!("{}:{}", parsed.host_str().unwrap(), parsed.port().unwrap());

        self.enter(&host);
        tokio::time::sleep(self.delay).await;
        self.leave(&host);

        let html = "<html><head><title>Page</title></head></html>";
        extract_fields(&job.url, html, &job.rules)
    }
}

#[tokio::test]
async fn test_pass_bounds_active_domains() {
    let dir = TempDir::new().unwrap();
    let fields = ["title_0", "title_1", "title_2", "title_3", "title_4"];
    let mut config = config_with_fields(&dir, &fields);
    config.crawler.max_active_domains = 2;

    let fetcher = Arc::new(DomainOverlapFetcher {
        in_flight: Mutex::new(HashMap::new()),
        peak_domains: AtomicUsize::new(0),
        delay: Duration::from_millis(150),
    });
    let orchestrator = open_orchestrator(&config).with_fetcher(fetcher.clone());

    // Rule keys are unique across domains, so each domain gets its own field
    let mut servers = Vec::new();
    for field in fields {
        let server = MockServer::start().await;
        mount_site(&server, "").await;
        register(&orchestrator, &domain_of(&server), &[(field, "//title/text()")]);
        servers.push(server);
    }

    let summary = orchestrator.run_pass().await.unwrap();

    assert!(summary.failures.is_empty(), "failures: {:?}", summary.failures);
    assert_eq!(summary.reports.len(), servers.len());
    assert!(summary.reports.iter().all(|r| r.records_inserted == 3));
    assert_eq!(fetcher.peak_domains.load(Ordering::SeqCst), 2);
    assert!(orchestrator.stale_domains().unwrap().is_empty());
}
