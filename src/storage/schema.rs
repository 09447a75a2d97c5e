//! Database schema definitions
//!
//! This module contains the SQL schema for the registry tables. The record
//! table is described by the sink binding and created by [`super::SqliteSink`].

/// SQL schema for the registry database
pub const SCHEMA_SQL: &str = r#"
-- Editable key/value crawler configuration
CREATE TABLE IF NOT EXISTS crawl_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL DEFAULT ''
);

-- Domains to crawl
CREATE TABLE IF NOT EXISTS crawl_domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    domain TEXT NOT NULL UNIQUE,
    status INTEGER NOT NULL DEFAULT 0,
    ttl INTEGER NOT NULL DEFAULT 24,
    last_crawl TEXT NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_domains_status ON crawl_domains(status);

-- XPath rules applied to every page of a domain; keys are globally unique
CREATE TABLE IF NOT EXISTS domain_attributes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    xpath TEXT NOT NULL,
    domain_id INTEGER NOT NULL REFERENCES crawl_domains(id)
);

CREATE INDEX IF NOT EXISTS idx_domain_attributes_domain ON domain_attributes(domain_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Quotes an SQL identifier
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
