//! Screep: a sitemap-driven scraper
//!
//! This crate crawls registered domains: it honors each domain's robots.txt,
//! discovers pages through sitemaps, fetches them under a politeness budget,
//! extracts fields with per-domain XPath rules and upserts the results in
//! batches into a configured record table.

pub mod config;
pub mod crawler;
pub mod robots;
pub mod sitemap;
pub mod storage;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Screep operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Access to {domain} is banned for {user_agent}")]
    AccessDenied { domain: String, user_agent: String },

    #[error("Extraction failed for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("No configuration found for key \"{0}\"")]
    ConfigMissing(String),

    #[error("Record sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Sink schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("No extraction rules have been defined")]
    NoExtractionRules,

    #[error("Job for {url} exceeded its {timeout:?} deadline")]
    JobTimeout { url: String, timeout: Duration },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

impl CrawlError {
    /// Short, stable classification used in log lines and crawl reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::AccessDenied { .. } => "access-denied",
            Self::Extraction { .. } => "extraction",
            Self::ConfigMissing(_) => "config-missing",
            Self::SinkUnavailable(_) => "sink-unavailable",
            Self::SchemaMismatch(_) => "schema-mismatch",
            Self::NoExtractionRules => "no-extraction-rules",
            Self::JobTimeout { .. } => "job-timeout",
            Self::Config(_) => "config",
            Self::Storage(_) => "storage",
            Self::Io(_) => "io",
            Self::TaskFailed(_) => "task-failed",
        }
    }

    /// Builds a transport error from a reqwest failure, keeping the offending URL
    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("timeout: {}", err)
        } else if err.is_redirect() {
            format!("too many redirects: {}", err)
        } else if err.is_connect() {
            format!("connection error: {}", err)
        } else if err.is_status() {
            format!("HTTP error: {}", err)
        } else {
            err.to_string()
        };

        Self::Transport {
            url: url.to_string(),
            message,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for Screep operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlReport, DomainController, Job, Orchestrator};
pub use robots::PolicyVerdict;
pub use storage::{DomainRecord, DomainStatus};
