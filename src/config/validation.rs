use crate::config::types::{
    Config, CrawlerConfig, FrontierConfig, TransportConfig, UserAgentConfig,
};
use crate::url::normalize_url;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_transport_config(&config.transport)?;
    validate_frontier_config(&config.frontier)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency_limit < 1 || config.concurrency_limit > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency_limit must be between 1 and 100, got {}",
            config.concurrency_limit
        )));
    }

    if config.recrawl_interval_ms < 1 {
        return Err(ConfigError::Validation(
            "recrawl_interval_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_transport_config(config: &TransportConfig) -> Result<(), ConfigError> {
    if config.timeout_ms == 0 || config.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "transport timeouts must be > 0".to_string(),
        ));
    }

    config.header_map()?;
    Ok(())
}

fn validate_frontier_config(config: &FrontierConfig) -> Result<(), ConfigError> {
    match config {
        FrontierConfig::Memory => Ok(()),
        FrontierConfig::Sqlite {
            database_path,
            initial_retry_time_ms,
            ..
        } => {
            if database_path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "database_path cannot be empty".to_string(),
                ));
            }
            validate_initial_retry(*initial_retry_time_ms)
        }
        FrontierConfig::Redis {
            url,
            delay_half_life_ms,
            initial_retry_time_ms,
            ..
        } => {
            let parsed = Url::parse(url)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid redis url: {}", e)))?;
            if !matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix") {
                return Err(ConfigError::InvalidUrl(format!(
                    "Redis url '{}' must use the redis:// or rediss:// scheme",
                    url
                )));
            }
            if *delay_half_life_ms == 0 {
                return Err(ConfigError::Validation(
                    "delay_half_life_ms must be > 0".to_string(),
                ));
            }
            validate_initial_retry(*initial_retry_time_ms)
        }
    }
}

fn validate_initial_retry(initial_retry_time_ms: u64) -> Result<(), ConfigError> {
    if initial_retry_time_ms == 0 {
        return Err(ConfigError::Validation(
            "initial_retry_time_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

/// Seeds must be crawlable HTTP(S) URLs
fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        normalize_url(seed).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
        })?;
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
