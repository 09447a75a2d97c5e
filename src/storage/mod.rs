//! Storage module for the domain registry, runtime configuration and records
//!
//! This module handles all database operations, including:
//! - SQLite schema management for the registry tables
//! - Domain registration, crawl status and stale-domain selection
//! - Per-domain extraction rules
//! - The key/value configuration store
//! - The record sink that receives scraped fields

mod schema;
mod sink;
mod sqlite;
mod traits;

pub use sink::SqliteSink;
pub use sqlite::SqliteStorage;
pub use traits::{DomainRegistry, RecordSink, StorageError, StorageResult};

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Field name -> extracted value
pub type FieldMap = BTreeMap<String, String>;

/// A registered domain
#[derive(Debug, Clone, PartialEq)]
pub struct DomainRecord {
    pub id: i64,
    pub name: String,
    pub domain: String,
    pub status: DomainStatus,
    /// Hours between crawls
    pub ttl_hours: u32,
    pub last_crawl: DateTime<Utc>,
}

impl DomainRecord {
    /// A domain is stale once it is enabled and its TTL has elapsed since the last crawl
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status != DomainStatus::Disabled
            && now - self.last_crawl >= Duration::hours(i64::from(self.ttl_hours))
    }
}

/// Timestamp given to domains that have never been crawled
pub fn never_crawled() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// Crawl status of a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainStatus {
    Ok,
    Error,
    Disabled,
}

impl DomainStatus {
    pub fn to_db_value(&self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::Error => 1,
            Self::Disabled => 2,
        }
    }

    pub fn from_db_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::Disabled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Disabled => "disabled",
        }
    }
}

/// A row in the record sink, keyed by URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub url: String,
    pub fields: FieldMap,
}

impl StoredRecord {
    pub fn new(url: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            url: url.into(),
            fields,
        }
    }
}
