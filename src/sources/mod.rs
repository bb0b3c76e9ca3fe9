//! Sources module
//!
//! A token source turns a possibly stale credential into a valid one.
//! Retries belong here, never to the callers of the token cache.

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::credential::Credential;

pub mod oauth2;

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a valid credential, refreshing `current` if needed.
    async fn fetch(&self, current: Option<&Credential>) -> Result<Credential>;
}
