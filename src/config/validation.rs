use crate::config::types::{Config, CrawlerConfig, SinkBinding, StorageConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_storage_config(&config.storage)?;
    validate_sink_binding(&config.sink)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.default_concurrency < 1 || config.default_concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "default-concurrency must be between 1 and 100, got {}",
            config.default_concurrency
        )));
    }

    if config.job_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "job-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch-size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.max_active_domains < 1 {
        return Err(ConfigError::Validation(format!(
            "max-active-domains must be >= 1, got {}",
            config.max_active_domains
        )));
    }

    if config.sitemap_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "sitemap-timeout-secs must be >= 1".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.max_failure_rate) {
        return Err(ConfigError::Validation(format!(
            "max-failure-rate must be between 0.0 and 1.0, got {}",
            config.max_failure_rate
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the sink binding
fn validate_sink_binding(binding: &SinkBinding) -> Result<(), ConfigError> {
    validate_identifier("sink table", &binding.table)?;
    validate_identifier("url-column", &binding.url_column)?;

    if binding.fields.is_empty() {
        return Err(ConfigError::Validation(
            "sink must bind at least one extraction field".to_string(),
        ));
    }

    for (field, column) in &binding.fields {
        validate_identifier(&format!("column for field '{}'", field), column)?;
        if column == &binding.url_column {
            return Err(ConfigError::Validation(format!(
                "field '{}' cannot be stored in the url column '{}'",
                field, column
            )));
        }
    }

    Ok(())
}

/// SQL identifiers are restricted to ASCII letters, digits and underscores
fn validate_identifier(what: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", what)));
    }

    if name.starts_with(|c: char| c.is_ascii_digit())
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must contain only ASCII letters, digits and underscores",
            what, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn binding() -> SinkBinding {
        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), "title".to_string());
        SinkBinding {
            table: "pages".to_string(),
            url_column: "url".to_string(),
            create_if_missing: true,
            fields,
        }
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("t", "pages").is_ok());
        assert!(validate_identifier("t", "page_2").is_ok());

        assert!(validate_identifier("t", "").is_err());
        assert!(validate_identifier("t", "2pages").is_err());
        assert!(validate_identifier("t", "pages; DROP TABLE x").is_err());
        assert!(validate_identifier("t", "pa\"ges").is_err());
    }

    #[test]
    fn test_sink_binding_valid() {
        assert!(validate_sink_binding(&binding()).is_ok());
    }

    #[test]
    fn test_sink_binding_requires_fields() {
        let mut b = binding();
        b.fields.clear();
        assert!(validate_sink_binding(&b).is_err());
    }

    #[test]
    fn test_sink_binding_rejects_url_column_reuse() {
        let mut b = binding();
        b.fields.insert("link".to_string(), "url".to_string());
        assert!(validate_sink_binding(&b).is_err());
    }

    #[test]
    fn test_crawler_config_bounds() {
        let mut config = CrawlerConfig::default();
        assert!(validate_crawler_config(&config).is_ok());

        config.default_concurrency = 0;
        assert!(validate_crawler_config(&config).is_err());

        config = CrawlerConfig::default();
        config.max_failure_rate = 1.5;
        assert!(validate_crawler_config(&config).is_err());

        config = CrawlerConfig::default();
        config.batch_size = 0;
        assert!(validate_crawler_config(&config).is_err());
    }
}
