//! Configuration module for Screep
//!
//! Static settings (crawler tunables, database location and the record sink
//! binding) come from a TOML file. Settings that operators change at runtime,
//! such as the crawl identity, live in the database and are read through a
//! TTL cache.
//!
//! # Example
//!
//! ```no_run
//! use screep::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("screep.toml")).unwrap();
//! println!("Records go to table: {}", config.sink.table);
//! ```

mod parser;
mod provider;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, SinkBinding, StorageConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub use provider::{CachedConfig, ConfigStore, DEFAULT_TIMEOUT_SECS, TIMEOUT, USERAGENT};
