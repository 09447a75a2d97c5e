use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Screep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    pub sink: SinkBinding,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Worker count for domains without a robots.txt crawl delay
    #[serde(rename = "default-concurrency", default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Wall-clock limit for a single page job (seconds)
    #[serde(rename = "job-timeout-secs", default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Number of scraped pages buffered before a consolidation flush
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum number of domains crawled at the same time
    #[serde(rename = "max-active-domains", default = "default_max_active_domains")]
    pub max_active_domains: usize,

    /// Timeout applied to sitemap downloads (seconds)
    #[serde(rename = "sitemap-timeout-secs", default = "default_sitemap_timeout")]
    pub sitemap_timeout_secs: u64,

    /// Maximum redirect hops followed per request
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Highest fraction of failed page jobs for which a crawl still counts as ok
    #[serde(rename = "max-failure-rate", default = "default_max_failure_rate")]
    pub max_failure_rate: f64,

    /// Lifetime of cached key/value configuration entries (seconds)
    #[serde(rename = "config-cache-ttl-secs", default = "default_config_cache_ttl")]
    pub config_cache_ttl_secs: u64,
}

impl CrawlerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn sitemap_timeout(&self) -> Duration {
        Duration::from_secs(self.sitemap_timeout_secs)
    }

    pub fn config_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config_cache_ttl_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            job_timeout_secs: default_job_timeout(),
            batch_size: default_batch_size(),
            max_active_domains: default_max_active_domains(),
            sitemap_timeout_secs: default_sitemap_timeout(),
            max_redirects: default_max_redirects(),
            max_failure_rate: default_max_failure_rate(),
            config_cache_ttl_secs: default_config_cache_ttl(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_job_timeout() -> u64 {
    120
}

fn default_batch_size() -> usize {
    100
}

fn default_max_active_domains() -> usize {
    4
}

fn default_sitemap_timeout() -> u64 {
    60
}

fn default_max_redirects() -> usize {
    8
}

fn default_max_failure_rate() -> f64 {
    1.0
}

fn default_config_cache_ttl() -> u64 {
    300
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding the registry, config and records
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Static binding between extraction fields and the record table
///
/// Every extraction rule field must be listed in `fields`; the value is the
/// column that receives it.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkBinding {
    /// Table storing one record per URL
    pub table: String,

    /// Column holding the record URL
    #[serde(rename = "url-column", default = "default_url_column")]
    pub url_column: String,

    /// Create the table at startup if it does not exist
    #[serde(rename = "create-if-missing", default)]
    pub create_if_missing: bool,

    /// Extraction field name -> column name
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_url_column() -> String {
    "url".to_string()
}

impl SinkBinding {
    /// Returns the column bound to an extraction field
    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}
