//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - Validates:
//!   * server / metrics / logging settings
//!   * directory base url and request timeout
//!   * token endpoint, client credentials and retry invariants
//!   * reset url allow-list entries

use tracing::{error, info};

use crate::config::service::{DirectoryConfig, OAuthConfig, ResetConfig, ServiceConfig};
use crate::config::settings::{RetryConfig, SettingsConfig};
use crate::observability::metrics::get_metrics;

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub async fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);
    validate_directory(&cfg.directory, &mut errors);
    validate_oauth(&cfg.oauth, &mut errors);
    validate_reset(&cfg.reset, &mut errors);

    if errors.is_empty() {
        info!("config valid");
        Ok(())
    } else {
        error!("configuration validation errors ({}):", errors.len());
        for e in &errors {
            error!(" - {}", e);
        }
        get_metrics().await.config_validation_errors.inc();
        Err(errors)
    }
}

/// SETTINGS VALIDATION
fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    if settings.server.host.is_empty() {
        errors.push(format!(
            "settings.server.host '{}' must be valid",
            settings.server.host
        ));
    }
    if settings.server.port.parse::<u16>().is_err() {
        errors.push(format!(
            "settings.server.port '{}' must be an integer in range 0-65535",
            settings.server.port
        ));
    }

    // metrics endpoint start with '/'
    let metrics = &settings.metrics;
    if !metrics.path.starts_with('/') {
        errors.push(format!(
            "settings.metrics.path '{}' must start with '/'",
            metrics.path
        ));
    }

    // logging level
    if let Some(logging) = &settings.logging {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' invalid; allowed: {:?}",
                logging.level, valid
            ));
        }
    }
}

/// DIRECTORY
fn validate_directory(directory: &DirectoryConfig, errors: &mut Vec<String>) {
    if !is_http_url(&directory.base_url) {
        errors.push(format!(
            "directory.base_url '{}' must be an http(s) url",
            directory.base_url
        ));
    }
    if directory.request_timeout_ms == 0 {
        errors.push("directory.request_timeout_ms must be > 0".to_string());
    }
}

/// TOKEN ENDPOINT
fn validate_oauth(oauth: &OAuthConfig, errors: &mut Vec<String>) {
    if !is_http_url(&oauth.token_url) {
        errors.push(format!("oauth.token_url '{}' must be an http(s) url", oauth.token_url));
    }
    if oauth.client_id.trim().is_empty() {
        errors.push("oauth.client_id cannot be empty".to_string());
    }
    if oauth.client_secret.trim().is_empty() {
        errors.push("oauth.client_secret cannot be empty".to_string());
    }
    if oauth.safety_margin_seconds > 60 * 60 * 24 {
        errors.push(format!(
            "oauth.safety_margin_seconds ({}) is unreasonably large",
            oauth.safety_margin_seconds
        ));
    }
    if let Some(retry) = &oauth.retry {
        validate_retry("oauth.retry", retry, errors);
    }
}

fn validate_retry(path: &str, retry: &RetryConfig, errors: &mut Vec<String>) {
    if let Some(attempts) = retry.attempts {
        if attempts == 0 {
            errors.push(format!("{}.attempts must be > 0", path));
        }
    }
    if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms) {
        if max < base {
            errors.push(format!(
                "{}.max_delay_ms ({}) must be >= base_delay_ms ({})",
                path, max, base
            ));
        }
    }
}

/// RESET URL ALLOW-LIST
fn validate_reset(reset: &ResetConfig, errors: &mut Vec<String>) {
    if reset.reset_url_allow_list.is_empty() {
        errors.push("reset.reset_url_allow_list is empty; at least one reset url required".to_string());
    }
    for (idx, url) in reset.reset_url_allow_list.iter().enumerate() {
        if !is_http_url(url) {
            errors.push(format!(
                "reset.reset_url_allow_list[{}] '{}' must be an http(s) url",
                idx, url
            ));
        }
    }
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}
