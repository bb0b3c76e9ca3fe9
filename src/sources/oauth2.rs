use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::cache::credential::Credential;
use crate::config::service::OAuthConfig;
use crate::resilience::retry::RetrySettings;
use crate::sources::TokenSource;

const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Client credentials token source.
#[derive(Debug, Clone)]
pub struct OAuth2TokenSource {
    pub cfg: OAuthConfig,
    pub client: Client,
    retry: RetrySettings,
    request_timeout: Duration,
}

impl OAuth2TokenSource {
    pub fn new(cfg: OAuthConfig, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build token endpoint HTTP client")?;
        let retry = RetrySettings::from_config(&cfg.retry);
        Ok(Self { cfg, client, retry, request_timeout })
    }

    /// Time a single `fetch` may need, retries included.
    pub fn refresh_budget(&self) -> Duration {
        self.retry.budget(self.request_timeout)
    }

    async fn request_token(&self) -> Result<Credential> {
        let mut form = HashMap::new();
        form.insert("grant_type", "client_credentials".to_owned());
        form.insert("client_id", self.cfg.client_id.clone());
        form.insert("client_secret", self.cfg.client_secret.clone());
        if let Some(scope) = &self.cfg.scope {
            form.insert("scope", scope.clone());
        }

        let response = self.client.post(&self.cfg.token_url).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("OAuth2 token request failed: {}", response.status()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .context("OAuth2 token response is not valid JSON")?;
        if body.access_token.is_empty() {
            return Err(anyhow!("OAuth2 token response has an empty access_token"));
        }
        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECONDS);
        debug!("token endpoint issued access token, expires in {} seconds", expires_in);
        Ok(Credential::expiring_in(body.access_token, expires_in))
    }
}

#[async_trait]
impl TokenSource for OAuth2TokenSource {
    async fn fetch(&self, _current: Option<&Credential>) -> Result<Credential> {
        // client credentials has no refresh token; a stale credential is simply replaced
        self.retry.run_with_retry(|| self.request_token()).await
    }
}
