//! Directory module
//!
//! User records of the remote identity store, the client capability that
//! reaches it and the `Directory` facade that guards every call with a fresh
//! credential and a timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::credential::Credential;
use crate::error::DirectoryError;

pub mod facade;
pub mod scim;

pub use facade::Directory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub value: String,
    #[serde(default)]
    pub primary: bool,
}

/// Generic attribute on a user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    #[serde(rename = "type")]
    pub entitlement_type: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub value: bool,
}

/// Resource metadata; `version` is the ETag the directory checks on `If-Match`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    pub user_name: String,
    #[serde(default)]
    pub emails: Vec<Email>,
    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl DirectoryUser {
    pub fn primary_email(&self) -> Option<&Email> {
        self.emails.iter().find(|email| email.primary)
    }

    pub fn version(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|meta| meta.version.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Replace,
    Remove,
}

/// One operation of a PATCH request. A request applies all or none of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self { op: PatchKind::Replace, path: path.into(), value: Some(value) }
    }
}

pub const ENTITLEMENTS_PATH: &str = "entitlements";
pub const PASSWORD_PATH: &str = "password";

/// Exact match on `userName`, with the value quoted for the filter grammar.
pub fn user_name_filter(user_name: &str) -> String {
    format!("userName eq \"{}\"", escape_filter_value(user_name))
}

pub fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Remote identity store. Every call carries a credential the caller has just
/// validated; implementations never obtain one on their own.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn list_users(&self, credential: &Credential, filter: &str) -> Result<Vec<DirectoryUser>, DirectoryError>;

    async fn get_user(&self, credential: &Credential, id: &str) -> Result<DirectoryUser, DirectoryError>;

    /// Applies `ops` all-or-nothing. With `version` set the write only lands
    /// if the record still carries that version; otherwise the directory
    /// answers `Rejected { status: 412, .. }`.
    async fn modify_user(
        &self,
        credential: &Credential,
        id: &str,
        ops: &[PatchOp],
        version: Option<&str>,
    ) -> Result<DirectoryUser, DirectoryError>;

    async fn delete_user(&self, credential: &Credential, id: &str) -> Result<(), DirectoryError>;

    /// The directory checks that `username` owns `id` and applies its password
    /// policy; a violation comes back as `Rejected { status: 409, .. }`.
    async fn change_password(
        &self,
        credential: &Credential,
        id: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<DirectoryUser, DirectoryError>;
}
