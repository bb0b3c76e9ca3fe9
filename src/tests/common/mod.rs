// tests/common/mod.rs
pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::broadcast::Receiver;

use crate::cache::credential::Credential;
use crate::cache::token_cache::TokenCache;
use crate::directory::{
    Directory, DirectoryClient, DirectoryUser, Email, Entitlement, Meta, PatchOp, ENTITLEMENTS_PATH, PASSWORD_PATH,
};
use crate::error::DirectoryError;
use crate::reset::events::{DomainEvent, EventPublisher};
use crate::reset::protocol::{EntitlementResetTokens, RESET_ENTITLEMENT_TYPE};
use crate::reset::workflow::PasswordResetWorkflow;
use crate::sources::TokenSource;

pub const RESET_URL: &str = "https://app.test/reset/";

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("reqwest client")
}

pub fn user(id: &str, user_name: &str) -> DirectoryUser {
    DirectoryUser {
        id: id.to_owned(),
        user_name: user_name.to_owned(),
        emails: vec![Email { value: user_name.to_owned(), primary: true }],
        entitlements: vec![],
        meta: None,
    }
}

fn version_tag(n: u64) -> Option<Meta> {
    Some(Meta { version: Some(format!("W/\"{}\"", n)) })
}

/// Counts token endpoint round-trips; each fetch hands out `token-<n>`.
pub struct CountingTokenSource {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub expires_in_seconds: i64,
    pub failing: AtomicBool,
}

impl CountingTokenSource {
    pub fn new(delay: Duration, expires_in_seconds: i64) -> Self {
        Self { calls: AtomicUsize::new(0), delay, expires_in_seconds, failing: AtomicBool::new(false) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn fetch(&self, _current: Option<&Credential>) -> Result<Credential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("token endpoint returned 503"));
        }
        Ok(Credential::expiring_in(format!("token-{}", n), self.expires_in_seconds))
    }
}

/// Directory held in memory. Filters understand the two shapes the workflow
/// sends: `userName eq "..."` and the reset entitlement lookup.
#[derive(Default)]
pub struct InMemoryDirectory {
    pub users: Mutex<HashMap<String, DirectoryUser>>,
    pub passwords: Mutex<HashMap<String, String>>,
    pub modify_calls: AtomicUsize,
    pub seen_tokens: Mutex<Vec<String>>,
    pub fail_next_modify: Mutex<Option<DirectoryError>>,
    /// Apply the next PATCH, then report the connection as lost.
    pub drop_response_of_next_modify: AtomicBool,
    pub password_policy_conflict: Mutex<Option<String>>,
    version_counter: std::sync::atomic::AtomicU64,
}

impl InMemoryDirectory {
    pub fn with_users(users: Vec<DirectoryUser>) -> Arc<Self> {
        let directory = Self::default();
        {
            let mut map = directory.users.lock().unwrap();
            for mut user in users {
                user.meta = version_tag(1);
                map.insert(user.id.clone(), user);
            }
        }
        Arc::new(directory)
    }

    pub fn user(&self, id: &str) -> DirectoryUser {
        self.users.lock().unwrap().get(id).cloned().expect("user exists")
    }

    pub fn password(&self, id: &str) -> Option<String> {
        self.passwords.lock().unwrap().get(id).cloned()
    }

    pub fn set_password(&self, id: &str, password: &str) {
        self.passwords.lock().unwrap().insert(id.to_owned(), password.to_owned());
    }

    pub fn modify_calls(&self) -> usize {
        self.modify_calls.load(Ordering::SeqCst)
    }

    pub fn reset_entitlements(&self, id: &str) -> Vec<Entitlement> {
        self.user(id)
            .entitlements
            .into_iter()
            .filter(|e| e.entitlement_type == RESET_ENTITLEMENT_TYPE)
            .collect()
    }

    fn record(&self, credential: &Credential) {
        self.seen_tokens.lock().unwrap().push(credential.access_token().to_owned());
    }

    fn quoted_after<'a>(filter: &'a str, marker: &str) -> Option<&'a str> {
        let start = filter.find(marker)? + marker.len();
        let rest = &filter[start..];
        let end = rest.find('"')?;
        Some(&rest[..end])
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn list_users(&self, credential: &Credential, filter: &str) -> Result<Vec<DirectoryUser>, DirectoryError> {
        self.record(credential);
        let users = self.users.lock().unwrap();
        let found = if filter.starts_with("userName eq ") {
            let name = Self::quoted_after(filter, "userName eq \"").unwrap_or_default();
            users.values().filter(|u| u.user_name == name).cloned().collect()
        } else if filter.starts_with("entitlements[") {
            let token = Self::quoted_after(filter, "display eq \"").unwrap_or_default();
            users
                .values()
                .filter(|u| {
                    u.entitlements
                        .iter()
                        .any(|e| e.entitlement_type == RESET_ENTITLEMENT_TYPE && e.display == token)
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        Ok(found)
    }

    async fn get_user(&self, credential: &Credential, id: &str) -> Result<DirectoryUser, DirectoryError> {
        self.record(credential);
        self.users
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("user {} not found", id)))
    }

    async fn modify_user(
        &self,
        credential: &Credential,
        id: &str,
        ops: &[PatchOp],
        version: Option<&str>,
    ) -> Result<DirectoryUser, DirectoryError> {
        self.record(credential);
        self.modify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next_modify.lock().unwrap().take() {
            return Err(err);
        }

        let mut users = self.users.lock().unwrap();
        let mut updated = users
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("user {} not found", id)))?;
        if let Some(expected) = version {
            if updated.version() != Some(expected) {
                return Err(DirectoryError::Rejected { status: 412, detail: "version mismatch".into() });
            }
        }
        let next_version = self.version_counter.fetch_add(1, Ordering::SeqCst) + 2;
        let mut new_password = None;
        for op in ops {
            let value = op.value.clone().unwrap_or_default();
            match op.path.as_str() {
                ENTITLEMENTS_PATH => {
                    updated.entitlements = serde_json::from_value(value).map_err(|err| DirectoryError::Rejected {
                        status: 400,
                        detail: err.to_string(),
                    })?;
                }
                PASSWORD_PATH => {
                    let password = value.as_str().unwrap_or_default().to_owned();
                    if let Some(detail) = self.password_policy_conflict.lock().unwrap().clone() {
                        return Err(DirectoryError::Rejected { status: 409, detail });
                    }
                    new_password = Some(password);
                }
                other => {
                    return Err(DirectoryError::Rejected { status: 400, detail: format!("unknown path {}", other) });
                }
            }
        }

        // all operations or none
        updated.meta = version_tag(next_version);
        users.insert(id.to_owned(), updated.clone());
        if let Some(password) = new_password {
            self.passwords.lock().unwrap().insert(id.to_owned(), password);
        }
        if self.drop_response_of_next_modify.swap(false, Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("connection reset by peer".to_owned()));
        }
        Ok(updated)
    }

    async fn delete_user(&self, credential: &Credential, id: &str) -> Result<(), DirectoryError> {
        self.record(credential);
        self.users
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NotFound(format!("user {} not found", id)))
    }

    async fn change_password(
        &self,
        credential: &Credential,
        id: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<DirectoryUser, DirectoryError> {
        self.record(credential);
        let user = self.get_user(credential, id).await?;
        if user.user_name != username {
            return Err(DirectoryError::Rejected { status: 409, detail: "username does not match the user id".into() });
        }
        if self.password(id).as_deref() != Some(old_password) {
            return Err(DirectoryError::Rejected { status: 409, detail: "old password is incorrect".into() });
        }
        if let Some(detail) = self.password_policy_conflict.lock().unwrap().clone() {
            return Err(DirectoryError::Rejected { status: 409, detail });
        }
        self.set_password(id, new_password);
        Ok(user)
    }
}

/// Delays every call so concurrent workflows interleave between read and write.
pub struct SlowDirectory {
    pub inner: Arc<InMemoryDirectory>,
    pub delay: Duration,
}

#[async_trait]
impl DirectoryClient for SlowDirectory {
    async fn list_users(&self, credential: &Credential, filter: &str) -> Result<Vec<DirectoryUser>, DirectoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_users(credential, filter).await
    }

    async fn get_user(&self, credential: &Credential, id: &str) -> Result<DirectoryUser, DirectoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_user(credential, id).await
    }

    async fn modify_user(
        &self,
        credential: &Credential,
        id: &str,
        ops: &[PatchOp],
        version: Option<&str>,
    ) -> Result<DirectoryUser, DirectoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.modify_user(credential, id, ops, version).await
    }

    async fn delete_user(&self, credential: &Credential, id: &str) -> Result<(), DirectoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_user(credential, id).await
    }

    async fn change_password(
        &self,
        credential: &Credential,
        id: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<DirectoryUser, DirectoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.change_password(credential, id, username, old_password, new_password).await
    }
}

pub struct Harness {
    pub workflow: Arc<PasswordResetWorkflow>,
    pub directory: Arc<InMemoryDirectory>,
    pub source: Arc<CountingTokenSource>,
    pub events: Receiver<DomainEvent>,
}

/// Workflow over the in-memory directory with `RESET_URL` allowed.
pub fn harness(users: Vec<DirectoryUser>) -> Harness {
    let directory = InMemoryDirectory::with_users(users);
    let source = Arc::new(CountingTokenSource::new(Duration::from_millis(1), 3600));
    let (workflow, events) = workflow_over(directory.clone(), source.clone());
    Harness { workflow, directory, source, events }
}

/// A separate workflow instance, as another process would run it, over `client`.
pub fn workflow_over(
    client: Arc<dyn DirectoryClient>,
    source: Arc<CountingTokenSource>,
) -> (Arc<PasswordResetWorkflow>, Receiver<DomainEvent>) {
    let tokens = Arc::new(TokenCache::new(source, 30));
    let facade = Directory::new(tokens, client, Duration::from_secs(2));
    let publisher = EventPublisher::new();
    let events = publisher.subscribe();
    let workflow = Arc::new(PasswordResetWorkflow::new(
        facade,
        Arc::new(EntitlementResetTokens::new()),
        vec![RESET_URL.to_owned()],
        publisher,
    ));
    (workflow, events)
}

/// Pulls the token out of the last reset url event.
pub fn issued_token(events: &mut Receiver<DomainEvent>) -> String {
    loop {
        match events.try_recv() {
            Ok(DomainEvent::PasswordResetRequested { reset_url, .. }) => {
                return reset_url.trim_start_matches(RESET_URL).to_owned();
            }
            Ok(_) => continue,
            Err(err) => panic!("no reset event published: {:?}", err),
        }
    }
}
