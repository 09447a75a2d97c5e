//! SQLite storage implementation
//!
//! This module provides the SQLite-backed domain registry and key/value
//! configuration store.

use crate::config::ConfigStore;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DomainRegistry, StorageError, StorageResult};
use crate::storage::{never_crawled, DomainRecord, DomainStatus, FieldMap};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;

const DOMAIN_COLUMNS: &str = "id, name, domain, status, ttl, last_crawl";

/// SQLite storage backend for the registry and configuration
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn domain_id(&self, domain: &str) -> StorageResult<i64> {
        self.conn
            .query_row(
                "SELECT id FROM crawl_domains WHERE domain = ?1",
                params![domain],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::DomainNotFound(domain.to_string()))
    }
}

fn row_to_domain(row: &Row<'_>) -> rusqlite::Result<DomainRecord> {
    let status: i64 = row.get(3)?;
    let last_crawl: String = row.get(5)?;

    Ok(DomainRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        domain: row.get(2)?,
        status: DomainStatus::from_db_value(status).unwrap_or(DomainStatus::Error),
        ttl_hours: row.get(4)?,
        last_crawl: DateTime::parse_from_rfc3339(&last_crawl)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| never_crawled()),
    })
}

/// Domain names need a dot and may not contain whitespace or slashes
fn validate_domain_name(domain: &str) -> StorageResult<()> {
    if domain.is_empty()
        || !domain.contains('.')
        || domain.chars().any(char::is_whitespace)
        || domain.contains('/')
    {
        return Err(StorageError::InvalidDomain(domain.to_string()));
    }
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl DomainRegistry for SqliteStorage {
    // ===== Domains =====

    fn add_domain(&mut self, domain: &str, name: &str, ttl_hours: u32) -> StorageResult<i64> {
        validate_domain_name(domain)?;

        let now = Utc::now().to_rfc3339();
        let result = self.conn.execute(
            "INSERT INTO crawl_domains (name, domain, status, ttl, last_crawl, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                name,
                domain,
                DomainStatus::Ok.to_db_value(),
                ttl_hours,
                never_crawled().to_rfc3339(),
                now
            ],
        );

        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(e) if is_constraint_violation(&e) => Err(StorageError::ConstraintViolation(
                format!("domain '{}' is already registered", domain),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn get_domain(&self, domain: &str) -> StorageResult<Option<DomainRecord>> {
        let sql = format!("SELECT {} FROM crawl_domains WHERE domain = ?1", DOMAIN_COLUMNS);
        let record = self
            .conn
            .query_row(&sql, params![domain], row_to_domain)
            .optional()?;
        Ok(record)
    }

    fn list_domains(&self) -> StorageResult<Vec<DomainRecord>> {
        let sql = format!("SELECT {} FROM crawl_domains ORDER BY domain", DOMAIN_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let domains = stmt
            .query_map([], row_to_domain)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(domains)
    }

    fn stale_domains(&self, now: DateTime<Utc>) -> StorageResult<Vec<DomainRecord>> {
        // Timestamps are stored as text, so the TTL comparison happens here
        let sql = format!(
            "SELECT {} FROM crawl_domains WHERE status < ?1 ORDER BY last_crawl ASC",
            DOMAIN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let domains = stmt
            .query_map(params![DomainStatus::Disabled.to_db_value()], row_to_domain)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(domains.into_iter().filter(|d| d.is_stale(now)).collect())
    }

    fn update_crawl_status(
        &mut self,
        domain: &str,
        status: DomainStatus,
        last_crawl: Option<DateTime<Utc>>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = match last_crawl {
            Some(at) => self.conn.execute(
                "UPDATE crawl_domains SET status = ?1, last_crawl = ?2, modified_at = ?3 WHERE domain = ?4",
                params![status.to_db_value(), at.to_rfc3339(), now, domain],
            )?,
            None => self.conn.execute(
                "UPDATE crawl_domains SET status = ?1, modified_at = ?2 WHERE domain = ?3",
                params![status.to_db_value(), now, domain],
            )?,
        };

        if updated == 0 {
            return Err(StorageError::DomainNotFound(domain.to_string()));
        }
        Ok(())
    }

    // ===== Extraction Rules =====

    fn add_extraction_rule(
        &mut self,
        domain: &str,
        field: &str,
        expression: &str,
    ) -> StorageResult<()> {
        let domain_id = self.domain_id(domain)?;

        let result = self.conn.execute(
            "INSERT INTO domain_attributes (key, xpath, domain_id) VALUES (?1, ?2, ?3)",
            params![field, expression, domain_id],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StorageError::ConstraintViolation(
                format!("field '{}' is already used by an extraction rule", field),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn extraction_rules(&self, domain: &str) -> StorageResult<FieldMap> {
        let mut stmt = self.conn.prepare(
            "SELECT a.key, a.xpath FROM domain_attributes a
             JOIN crawl_domains d ON d.id = a.domain_id
             WHERE d.domain = ?1",
        )?;

        let rules = stmt
            .query_map(params![domain], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<FieldMap, _>>()?;

        Ok(rules)
    }

    fn count_extraction_rules(&self) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM domain_attributes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl ConfigStore for SqliteStorage {
    fn get_config(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM crawl_config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_config(&mut self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO crawl_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
