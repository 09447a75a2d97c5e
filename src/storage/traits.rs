//! Storage traits and error types
//!
//! This module defines the trait interfaces for the domain registry and the
//! record sink, and the associated error types.

use crate::storage::{DomainRecord, DomainStatus, FieldMap, StoredRecord};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    #[error("Field '{0}' is not bound to a sink column")]
    UnboundField(String),

    #[error("Sink schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Registry of crawlable domains and their extraction rules
pub trait DomainRegistry {
    // ===== Domains =====

    /// Registers a new domain, returning its ID
    ///
    /// # Arguments
    ///
    /// * `domain` - Host name such as `shop.example.com`
    /// * `name` - Human readable label
    /// * `ttl_hours` - Hours between crawls
    fn add_domain(&mut self, domain: &str, name: &str, ttl_hours: u32) -> StorageResult<i64>;

    /// Gets a domain by host name
    fn get_domain(&self, domain: &str) -> StorageResult<Option<DomainRecord>>;

    /// Lists all registered domains
    fn list_domains(&self) -> StorageResult<Vec<DomainRecord>>;

    /// Returns the domains that are due for a crawl at `now`
    fn stale_domains(&self, now: DateTime<Utc>) -> StorageResult<Vec<DomainRecord>>;

    /// Records the terminal status of a crawl
    ///
    /// `last_crawl` is only written when provided, so failed crawls can leave
    /// the domain due for the next pass.
    fn update_crawl_status(
        &mut self,
        domain: &str,
        status: DomainStatus,
        last_crawl: Option<DateTime<Utc>>,
    ) -> StorageResult<()>;

    // ===== Extraction Rules =====

    /// Adds an extraction rule; field names are unique across all domains
    fn add_extraction_rule(&mut self, domain: &str, field: &str, expression: &str)
        -> StorageResult<()>;

    /// Gets the field -> expression rules of a domain
    fn extraction_rules(&self, domain: &str) -> StorageResult<FieldMap>;

    /// Counts extraction rules across all domains
    fn count_extraction_rules(&self) -> StorageResult<u64>;
}

/// Destination for scraped records, keyed by URL
pub trait RecordSink {
    /// Extraction field names this sink can store
    fn field_names(&self) -> Vec<String>;

    /// Finds the existing records whose URL exactly matches one of `urls`
    fn find_by_urls(&self, urls: &[&str]) -> StorageResult<Vec<StoredRecord>>;

    /// Overwrites the given fields of the record stored under `url`
    fn update_fields(&mut self, url: &str, fields: &FieldMap) -> StorageResult<()>;

    /// Inserts new records as a single unit
    fn bulk_insert(&mut self, records: &[StoredRecord]) -> StorageResult<()>;
}
