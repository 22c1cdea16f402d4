use crate::config::types::{
    AlertConfig, Config, CrawlerConfig, OutputConfig, ParserConfig, RetryConfig, ScheduleConfig,
    UserAgentConfig,
};
use crate::schedule::CronSchedule;
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_retry_config(&config.retry)?;
    validate_schedule_config(&config.schedule)?;
    validate_alert_config(&config.alerts)?;
    validate_parser_config(&config.parser)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed URL is required".to_string(),
        ));
    }

    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS",
                seed
            )));
        }
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.request_timeout_ms == 0 || config.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "request and connect timeouts must be > 0".to_string(),
        ));
    }

    if config.max_redirects > 20 {
        return Err(ConfigError::Validation(format!(
            "max_redirects must be <= 20, got {}",
            config.max_redirects
        )));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1 when set".to_string(),
        ));
    }

    if config.max_run_duration_secs == Some(0) {
        return Err(ConfigError::Validation(
            "max_run_duration_secs must be >= 1 when set".to_string(),
        ));
    }

    if config.idle_poll_ms == 0 {
        return Err(ConfigError::Validation(
            "idle_poll_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

/// Validates the trigger: exactly one of interval or cron
fn validate_schedule_config(config: &ScheduleConfig) -> Result<(), ConfigError> {
    match (&config.interval_secs, &config.cron) {
        (Some(_), Some(_)) => Err(ConfigError::Validation(
            "schedule must set only one of interval-secs or cron".to_string(),
        )),
        (None, None) => Err(ConfigError::Validation(
            "schedule requires interval-secs or cron".to_string(),
        )),
        (Some(0), None) => Err(ConfigError::Validation(
            "interval-secs must be >= 1".to_string(),
        )),
        (Some(_), None) => Ok(()),
        (None, Some(expr)) => CronSchedule::parse(expr).map(|_| ()),
    }
}

/// Validates alerting configuration
fn validate_alert_config(config: &AlertConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.failed_page_ratio) {
        return Err(ConfigError::Validation(format!(
            "failed_page_ratio must be within [0, 1], got {}",
            config.failed_page_ratio
        )));
    }

    if config.history_size < 1 {
        return Err(ConfigError::Validation(
            "history_size must be >= 1".to_string(),
        ));
    }

    if let Some(webhook) = &config.webhook_url {
        Url::parse(webhook)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid webhook_url: {}", e)))?;
    }

    if config.webhook_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "webhook_timeout_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates that every configured selector parses
fn validate_parser_config(config: &ParserConfig) -> Result<(), ConfigError> {
    validate_selector(&config.follow_selector)?;

    if let Some(selector) = &config.record_selector {
        validate_selector(selector)?;
    }

    for spec in config.fields.values() {
        crate::crawler::FieldSelector::parse(spec)?;
    }

    if config.record_key_segment == Some(0) {
        return Err(ConfigError::Validation(
            "record_key_segment counts from 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidSelector(selector.to_string()))
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
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

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.report_dir.is_empty() {
        return Err(ConfigError::Validation(
            "report_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
