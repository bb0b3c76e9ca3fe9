use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::credential::Credential;
use crate::cache::token_cache::TokenCache;
use crate::directory::{DirectoryClient, DirectoryUser, PatchOp};
use crate::error::{DirectoryError, FacadeError};
use crate::observability::metrics::get_metrics;

static UNAVAILABLE_MSG: &'static str = "unavailable";
static REJECTED_MSG: &'static str = "rejected";
static NOT_FOUND_MSG: &'static str = "not_found";
static AUTH_MSG: &'static str = "auth";

/// Directory access as the workflow sees it: fresh credential first, bounded
/// wait, errors already in the facade taxonomy.
#[derive(Clone)]
pub struct Directory {
    tokens: Arc<TokenCache>,
    client: Arc<dyn DirectoryClient>,
    request_timeout: Duration,
}

impl Directory {
    pub fn new(tokens: Arc<TokenCache>, client: Arc<dyn DirectoryClient>, request_timeout: Duration) -> Self {
        Self { tokens, client, request_timeout }
    }

    pub async fn list_users(&self, filter: &str) -> Result<Vec<DirectoryUser>, FacadeError> {
        let client = self.client.clone();
        self.call("list_users", move |credential| async move {
            client.list_users(&credential, filter).await
        })
        .await
    }

    pub async fn get_user(&self, id: &str) -> Result<DirectoryUser, FacadeError> {
        let client = self.client.clone();
        self.call("get_user", move |credential| async move {
            client.get_user(&credential, id).await
        })
        .await
    }

    pub async fn modify_user(&self, id: &str, ops: &[PatchOp], version: Option<&str>) -> Result<DirectoryUser, FacadeError> {
        let client = self.client.clone();
        self.call("modify_user", move |credential| async move {
            client.modify_user(&credential, id, ops, version).await
        })
        .await
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), FacadeError> {
        let client = self.client.clone();
        self.call("delete_user", move |credential| async move {
            client.delete_user(&credential, id).await
        })
        .await
    }

    pub async fn change_password(
        &self,
        id: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<DirectoryUser, FacadeError> {
        let client = self.client.clone();
        self.call("change_password", move |credential| async move {
            client
                .change_password(&credential, id, username, old_password, new_password)
                .await
        })
        .await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, request: F) -> Result<T, FacadeError>
    where
        F: FnOnce(Arc<Credential>) -> Fut,
        Fut: Future<Output = Result<T, DirectoryError>>,
    {
        let metrics = get_metrics().await;
        metrics.directory_requests.with_label_values(&[operation]).inc();

        let credential = self.tokens.ensure_valid().await.inspect_err(|err| {
            metrics.directory_failures.with_label_values(&[operation, AUTH_MSG]).inc();
            warn!(operation, error = %err, "no valid credential for directory call");
        })?;

        let start = Instant::now();
        let result = match tokio::time::timeout(self.request_timeout, request(credential)).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Unavailable(format!(
                "{} timed out after {} ms",
                operation,
                self.request_timeout.as_millis()
            ))),
        };
        metrics.directory_duration.with_label_values(&[operation]).observe(start.elapsed().as_secs_f64());

        match result {
            Ok(value) => {
                debug!(operation, "directory call succeeded");
                Ok(value)
            }
            Err(err) => {
                let reason = match &err {
                    DirectoryError::Unavailable(_) => UNAVAILABLE_MSG,
                    DirectoryError::Rejected { .. } => REJECTED_MSG,
                    DirectoryError::NotFound(_) => NOT_FOUND_MSG,
                };
                metrics.directory_failures.with_label_values(&[operation, reason]).inc();
                warn!(operation, error = %err, "directory call failed");
                Err(err.into())
            }
        }
    }
}
