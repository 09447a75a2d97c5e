//! Runtime key/value configuration
//!
//! Values such as the crawl identity live in the database so they can change
//! between runs without touching the TOML file. Reads go through
//! [`CachedConfig`], which keeps each found value for a fixed TTL and drops it
//! as soon as the key is written.

use crate::storage::StorageResult;
use crate::{ConfigError, CrawlError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Crawl identity sent as the User-Agent header and matched against robots.txt
pub const USERAGENT: &str = "USERAGENT";

/// Page fetch timeout in seconds
pub const TIMEOUT: &str = "TIMEOUT";

/// Fetch timeout used when `TIMEOUT` is not configured
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Backing store for key/value configuration
pub trait ConfigStore {
    /// Returns the value for a key, or `None` if the key does not exist
    fn get_config(&self, key: &str) -> StorageResult<Option<String>>;

    /// Inserts or replaces the value for a key
    fn set_config(&mut self, key: &str, value: &str) -> StorageResult<()>;
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    cached_at: Instant,
}

/// TTL cache in front of a [`ConfigStore`]
pub struct CachedConfig<S> {
    store: Arc<Mutex<S>>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedValue>>,
}

impl<S: ConfigStore> CachedConfig<S> {
    pub fn new(store: Arc<Mutex<S>>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the value for `key`, reading through to the store on a cache miss
    ///
    /// Missing keys are not cached, so a value written later by another
    /// process is picked up on the next read.
    pub fn value_for_key(&self, key: &str) -> Result<Option<String>, CrawlError> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.get(key) {
                if cached.cached_at.elapsed() < self.ttl {
                    return Ok(Some(cached.value.clone()));
                }
            }
        }

        let value = {
            let store = self.store.lock().unwrap();
            store.get_config(key)?
        };

        let mut cache = self.cache.lock().unwrap();
        match &value {
            Some(v) => {
                cache.insert(
                    key.to_string(),
                    CachedValue {
                        value: v.clone(),
                        cached_at: Instant::now(),
                    },
                );
            }
            None => {
                cache.remove(key);
            }
        }

        Ok(value)
    }

    /// Returns the value for `key`, failing with `ConfigMissing` when absent
    pub fn require(&self, key: &str) -> Result<String, CrawlError> {
        self.value_for_key(key)?
            .ok_or_else(|| CrawlError::ConfigMissing(key.to_string()))
    }

    /// Writes a value and invalidates its cache entry
    pub fn set(&self, key: &str, value: &str) -> Result<(), CrawlError> {
        {
            let mut store = self.store.lock().unwrap();
            store.set_config(key, value)?;
        }
        self.invalidate(key);
        Ok(())
    }

    /// Drops the cached value for a key
    pub fn invalidate(&self, key: &str) {
        self.cache.lock().unwrap().remove(key);
    }

    /// The configured crawl identity (required)
    pub fn user_agent(&self) -> Result<String, CrawlError> {
        self.require(USERAGENT)
    }

    /// The page fetch timeout, defaulting to 15 seconds
    pub fn fetch_timeout(&self) -> Result<Duration, CrawlError> {
        match self.value_for_key(TIMEOUT)? {
            None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| {
                    CrawlError::Config(ConfigError::Validation(format!(
                        "{} must be a whole number of seconds, got '{}'",
                        TIMEOUT, raw
                    )))
                }),
        }
    }
}
