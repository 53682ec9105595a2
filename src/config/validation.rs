use crate::config::types::{Config, CrawlerConfig, OutputConfig, PostalCodeConfig, TimeoutConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_postal_code_config(&config.postal_codes)?;
    validate_timeout_config(&config.timeouts)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 32 {
        return Err(ConfigError::Validation(format!(
            "max_concurrency must be between 1 and 32, got {}",
            config.max_concurrency
        )));
    }

    if config.radius_km < 1 || config.radius_km > 500 {
        return Err(ConfigError::Validation(format!(
            "radius_km must be between 1 and 500, got {}",
            config.radius_km
        )));
    }

    if config.scroll_steps > 200 {
        return Err(ConfigError::Validation(format!(
            "scroll_steps must be <= 200, got {}",
            config.scroll_steps
        )));
    }

    let url = Url::parse(&config.start_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start_url: {}", e)))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "start_url '{}' must use http or https",
            config.start_url
        )));
    }

    Ok(())
}

/// Validates postal-code source configuration
fn validate_postal_code_config(config: &PostalCodeConfig) -> Result<(), ConfigError> {
    for prefix in &config.range_prefixes {
        validate_range_prefix(prefix)?;
    }
    Ok(())
}

/// A range prefix is the sentinel "all" or one or two ASCII digits
fn validate_range_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix == "all" {
        return Ok(());
    }

    if prefix.is_empty() || prefix.len() > 2 || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::Validation(format!(
            "range prefix must be one or two digits or \"all\", got '{}'",
            prefix
        )));
    }

    Ok(())
}

fn validate_timeout_config(config: &TimeoutConfig) -> Result<(), ConfigError> {
    if config.result_poll_attempts < 1 {
        return Err(ConfigError::Validation(
            "result_poll_attempts must be >= 1".to_string(),
        ));
    }
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.diagnostics_dir.is_empty() {
        return Err(ConfigError::Validation(
            "diagnostics_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}
