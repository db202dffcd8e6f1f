use crate::config::types::{BrowserConfig, Config, CrawlerConfig, FilterConfig, StoreConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_browser_config(&config.browser)?;
    validate_store_config(&config.store)?;
    validate_filter_config(&config.filters)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.repetitions < 1 {
        return Err(ConfigError::Validation(format!(
            "repetitions must be >= 1, got {}",
            config.repetitions
        )));
    }

    Ok(())
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.navigation_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "navigation-timeout-ms must be greater than zero".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_filter_config(config: &FilterConfig) -> Result<(), ConfigError> {
    for pattern in &config.exclude_domains {
        validate_domain_pattern(pattern)?;
    }
    Ok(())
}

/// Validates a domain pattern (supports a leading "*." wildcard)
pub fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain pattern '{}' has no domain part",
            pattern
        )));
    }

    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with(['.', '-']) || domain.ends_with(['.', '-']) || domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' has an empty or malformed label",
            domain
        )));
    }

    Ok(())
}
