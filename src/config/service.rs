use serde::Deserialize;
use crate::config::settings::{RetryConfig, SettingsConfig};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OAUTH_SAFETY_MARGIN_SECONDS: u64 = 30;

/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub settings: SettingsConfig,
    pub directory: DirectoryConfig,
    pub oauth: OAuthConfig,
    pub reset: ResetConfig,
}

/// ================================
/// Identity directory (SCIM)
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    /// e.g. https://idp.example.com/identity/restv1/scim/v2
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// ================================
/// Token endpoint (client credentials)
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    /// token is refreshed this many seconds before it expires
    #[serde(default = "default_safety_margin_seconds")]
    pub safety_margin_seconds: u64,
    pub retry: Option<RetryConfig>,
}

/// ================================
/// Password reset
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ResetConfig {
    /// exact reset URLs a caller may ask the token to be appended to
    pub reset_url_allow_list: Vec<String>,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_safety_margin_seconds() -> u64 {
    DEFAULT_OAUTH_SAFETY_MARGIN_SECONDS
}
