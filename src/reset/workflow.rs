//! Password reset and password change orchestration.
//!
//! Per attempt: requested -> token issued -> (reset url dispatched by an event
//! subscriber) -> consumed, or rejected as invalid.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::directory::{user_name_filter, Directory, DirectoryUser, PatchOp, PASSWORD_PATH};
use crate::error::FacadeError;
use crate::observability::metrics::get_metrics;
use crate::reset::events::{DomainEvent, EventPublisher};
use crate::reset::locks::RecordLocks;
use crate::reset::protocol::ResetTokenProtocol;

static OK_MSG: &'static str = "ok";
static RESET_FLOW: &'static str = "reset";
static CHANGE_FLOW: &'static str = "change";

const PRECONDITION_FAILED: u16 = 412;

pub struct PasswordResetWorkflow {
    directory: Directory,
    protocol: Arc<dyn ResetTokenProtocol>,
    reset_url_allow_list: Vec<String>,
    events: EventPublisher,
    record_locks: RecordLocks,
}

impl PasswordResetWorkflow {
    pub fn new(
        directory: Directory,
        protocol: Arc<dyn ResetTokenProtocol>,
        reset_url_allow_list: Vec<String>,
        events: EventPublisher,
    ) -> Self {
        Self { directory, protocol, reset_url_allow_list, events, record_locks: RecordLocks::new() }
    }

    pub fn is_allowed_reset_url(&self, reset_url: &str) -> bool {
        self.reset_url_allow_list.iter().any(|allowed| allowed == reset_url)
    }

    /// Issues a reset token for `user_id` (a userName) and announces the reset
    /// url. The token itself is never returned.
    pub async fn request_reset(&self, user_id: &str, reset_url: &str) -> Result<(), FacadeError> {
        let result = self.try_request_reset(user_id, reset_url).await;
        let outcome = match &result {
            Ok(_) => OK_MSG,
            Err(err) => err.kind(),
        };
        get_metrics().await.reset_requests.with_label_values(&[outcome]).inc();
        result.map_err(FacadeError::external)
    }

    async fn try_request_reset(&self, user_id: &str, reset_url: &str) -> Result<(), FacadeError> {
        if user_id.trim().is_empty() {
            return Err(FacadeError::MissingInput("userId".to_owned()));
        }
        if !self.is_allowed_reset_url(reset_url) {
            warn!("reset requested with a url outside the allow-list");
            return Err(FacadeError::InvalidResetUrl);
        }

        let resolved = self.resolve_user_name(user_id).await?;
        let _guard = self.record_locks.lock(&resolved.id).await;
        let user = self.directory.get_user(&resolved.id).await.map_err(|err| match err {
            FacadeError::DirectoryNotFound(_) => FacadeError::UserNotFound,
            other => other,
        })?;
        let issued = self.protocol.issue(&user);

        let updated = self
            .directory
            .modify_user(&user.id, &issued.patch, user.version())
            .await
            .map_err(|err| match err {
                FacadeError::DirectoryNotFound(_) => FacadeError::UserNotFound,
                FacadeError::DirectoryRejected { status: PRECONDITION_FAILED, .. } => {
                    FacadeError::DirectoryUnavailable("user record changed during the request".to_owned())
                }
                other => other,
            })?;

        info!(user_id = %updated.id, "password reset token issued");
        self.events.publish(DomainEvent::PasswordResetRequested {
            user_id: updated.id,
            reset_url: format!("{}{}", reset_url, issued.token),
        });
        Ok(())
    }

    /// Exactly one record may match; an ambiguous name is never resolved to
    /// its first hit.
    async fn resolve_user_name(&self, user_name: &str) -> Result<DirectoryUser, FacadeError> {
        let mut users = self
            .directory
            .list_users(&user_name_filter(user_name))
            .await
            .map_err(|err| match err {
                FacadeError::DirectoryNotFound(_) => FacadeError::UserNotFound,
                other => other,
            })?;

        match users.len() {
            1 => Ok(users.remove(0)),
            0 => Err(FacadeError::UserNotFound),
            n => {
                warn!("userName filter matched {} records, refusing to pick one", n);
                Err(FacadeError::UserNotFound)
            }
        }
    }

    /// Consumes `token` and sets `new_password` in one directory write.
    pub async fn complete_reset(&self, token: &str, new_password: &str) -> Result<(), FacadeError> {
        let result = self.try_complete_reset(token, new_password).await;
        let outcome = match &result {
            Ok(_) => OK_MSG,
            Err(err) => err.kind(),
        };
        get_metrics().await.password_changes.with_label_values(&[RESET_FLOW, outcome]).inc();
        result.map_err(FacadeError::external)
    }

    async fn try_complete_reset(&self, token: &str, new_password: &str) -> Result<(), FacadeError> {
        if token.is_empty() {
            return Err(FacadeError::MissingInput("resetPasswordToken".to_owned()));
        }
        if new_password.is_empty() {
            return Err(FacadeError::MissingInput("newPassword".to_owned()));
        }

        let filter = self.protocol.lookup_filter(token).ok_or(FacadeError::InvalidResetToken)?;
        let candidates = self
            .directory
            .list_users(&filter)
            .await
            .map_err(|err| match err {
                FacadeError::DirectoryNotFound(_) => FacadeError::InvalidResetToken,
                other => other,
            })?;

        let owner_id = self.find_token_owner(candidates, token)?.id;

        // Consume against a record read under the lock and write it back only
        // if nothing changed since that read.
        let _guard = self.record_locks.lock(&owner_id).await;
        let owner = self.directory.get_user(&owner_id).await.map_err(|err| match err {
            FacadeError::DirectoryNotFound(_) => FacadeError::InvalidResetToken,
            other => other,
        })?;
        let mut ops = self.protocol.consume(&owner, token)?;
        ops.push(PatchOp::replace(PASSWORD_PATH, json!(new_password)));

        match self.directory.modify_user(&owner.id, &ops, owner.version()).await {
            Ok(_) => {}
            Err(FacadeError::DirectoryRejected { status, detail }) if status == 400 || status == 409 => {
                return Err(FacadeError::PasswordChangeRejected(detail));
            }
            Err(FacadeError::DirectoryRejected { status: PRECONDITION_FAILED, .. }) => {
                debug!("reset record changed between read and write");
                return Err(FacadeError::InvalidResetToken);
            }
            Err(FacadeError::DirectoryNotFound(_)) => return Err(FacadeError::InvalidResetToken),
            Err(FacadeError::DirectoryUnavailable(detail)) => {
                self.reconcile_interrupted_reset(&owner.id, token, detail).await?;
            }
            Err(other) => return Err(other),
        }

        info!(user_id = %owner.id, "password reset completed");
        self.events.publish(DomainEvent::PasswordChanged { user_id: owner.id });
        Ok(())
    }

    fn find_token_owner(&self, candidates: Vec<DirectoryUser>, token: &str) -> Result<DirectoryUser, FacadeError> {
        let mut owners = Vec::new();
        let mut already_used = false;
        for user in candidates {
            match self.protocol.consume(&user, token) {
                Ok(_) => owners.push(user),
                Err(FacadeError::TokenAlreadyUsed) => already_used = true,
                Err(_) => {}
            }
        }

        match owners.len() {
            1 => Ok(owners.remove(0)),
            0 if already_used => {
                debug!("reset token replayed after consumption");
                Err(FacadeError::TokenAlreadyUsed)
            }
            0 => Err(FacadeError::InvalidResetToken),
            n => {
                warn!("reset token found on {} records, refusing to consume", n);
                Err(FacadeError::InvalidResetToken)
            }
        }
    }

    /// The write may have landed before the connection failed. The token and
    /// the password travel in one PATCH, so a consumed token proves both.
    async fn reconcile_interrupted_reset(&self, user_id: &str, token: &str, detail: String) -> Result<(), FacadeError> {
        warn!(user_id, "reset write interrupted, re-reading the record");
        match self.directory.get_user(user_id).await {
            Ok(user) if self.protocol.is_consumed(&user, token) => {
                info!(user_id, "interrupted reset write had been applied");
                Ok(())
            }
            Ok(_) => Err(FacadeError::DirectoryUnavailable(detail)),
            Err(err) => {
                warn!(user_id, error = %err, "could not confirm interrupted reset write");
                Err(FacadeError::DirectoryUnavailable(detail))
            }
        }
    }

    /// Authenticated change; the directory verifies the old password and the
    /// id/username pairing. Returns the directory id of the changed user.
    pub async fn change_password(
        &self,
        user_id: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<String, FacadeError> {
        let result = self.try_change_password(user_id, username, old_password, new_password).await;
        let outcome = match &result {
            Ok(_) => OK_MSG,
            Err(err) => err.kind(),
        };
        get_metrics().await.password_changes.with_label_values(&[CHANGE_FLOW, outcome]).inc();
        result
    }

    async fn try_change_password(
        &self,
        user_id: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<String, FacadeError> {
        for (field, value) in [
            ("id", user_id),
            ("username", username),
            ("old_password", old_password),
            ("new_password", new_password),
        ] {
            if value.is_empty() {
                return Err(FacadeError::MissingInput(field.to_owned()));
            }
        }

        let _guard = self.record_locks.lock(user_id).await;
        let updated = self
            .directory
            .change_password(user_id, username, old_password, new_password)
            .await
            .map_err(|err| match err {
                FacadeError::DirectoryRejected { status, detail } if status == 400 || status == 409 => {
                    FacadeError::PasswordChangeRejected(detail)
                }
                FacadeError::DirectoryNotFound(_) => FacadeError::UserNotFound,
                FacadeError::DirectoryRejected { status: PRECONDITION_FAILED, .. } => {
                    FacadeError::DirectoryUnavailable("user record changed during the request".to_owned())
                }
                other => other,
            })?;

        info!(user_id = %updated.id, "password changed");
        self.events.publish(DomainEvent::PasswordChanged { user_id: updated.id.clone() });
        Ok(updated.id)
    }
}
