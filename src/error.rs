//! Error taxonomy of the facade.
//!
//! Transport failures from the token endpoint and the directory are
//! re-classified here before they reach a caller. Every variant carries plain
//! strings so a single refresh failure can be cloned out to all waiters.

use thiserror::Error;

/// Caller-facing failure kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FacadeError {
    #[error("token source is not configured")]
    Unconfigured,

    #[error("access token refresh failed: {0}")]
    AuthRefreshFailed(String),

    #[error("directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("directory rejected the request ({status}): {detail}")]
    DirectoryRejected { status: u16, detail: String },

    #[error("directory record not found: {0}")]
    DirectoryNotFound(String),

    #[error("reset url is not allowed")]
    InvalidResetUrl,

    #[error("no such user found")]
    UserNotFound,

    #[error("invalid reset token")]
    InvalidResetToken,

    /// Internal only. Reported to callers exactly like `InvalidResetToken`.
    #[error("invalid reset token")]
    TokenAlreadyUsed,

    #[error("unable to change password: {0}")]
    PasswordChangeRejected(String),

    #[error("missing required input: {0}")]
    MissingInput(String),
}

impl FacadeError {
    /// Stable error code for responses and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::AuthRefreshFailed(_) => "auth_refresh_failed",
            Self::DirectoryUnavailable(_) => "directory_unavailable",
            Self::DirectoryRejected { .. } => "directory_rejected",
            Self::DirectoryNotFound(_) => "directory_not_found",
            Self::InvalidResetUrl => "invalid_reset_url",
            Self::UserNotFound => "user_not_found",
            Self::InvalidResetToken | Self::TokenAlreadyUsed => "invalid_reset_token",
            Self::PasswordChangeRejected(_) => "password_change_rejected",
            Self::MissingInput(_) => "missing_input",
        }
    }

    /// Human readable summary, safe to show to an end user.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Unconfigured | Self::AuthRefreshFailed(_) => "Something went wrong while authorizing with the directory",
            Self::DirectoryUnavailable(_) => "Directory is temporarily unavailable",
            Self::DirectoryRejected { .. } => "Directory rejected the request",
            Self::DirectoryNotFound(_) | Self::UserNotFound => "No such user found",
            Self::InvalidResetUrl => "Invalid reset URL",
            Self::InvalidResetToken | Self::TokenAlreadyUsed => "Invalid reset token",
            Self::PasswordChangeRejected(_) => "Unable to change password",
            Self::MissingInput(_) => "Required input is missing",
        }
    }

    /// Structured detail captured from the collaborator, if any.
    pub fn info_message(&self) -> Option<String> {
        match self {
            Self::AuthRefreshFailed(detail)
            | Self::DirectoryUnavailable(detail)
            | Self::DirectoryNotFound(detail)
            | Self::PasswordChangeRejected(detail) => Some(detail.clone()),
            Self::DirectoryRejected { detail, .. } => Some(detail.clone()),
            Self::MissingInput(field) => Some(format!("'{}' is required", field)),
            Self::Unconfigured => Some(
                "Uninitialized access token. Please initialize the service with a valid token source".to_owned(),
            ),
            _ => None,
        }
    }

    /// Folds internal-only variants into what callers may observe.
    pub fn external(self) -> Self {
        match self {
            Self::TokenAlreadyUsed => Self::InvalidResetToken,
            other => other,
        }
    }
}

/// Failures reported by a `DirectoryClient` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Network failure, timeout or 5xx.
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// 4xx other than 404, with the directory's detail message.
    #[error("directory rejected request with status {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("directory record not found: {0}")]
    NotFound(String),
}

impl From<DirectoryError> for FacadeError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unavailable(detail) => FacadeError::DirectoryUnavailable(detail),
            DirectoryError::Rejected { status, detail } => FacadeError::DirectoryRejected { status, detail },
            DirectoryError::NotFound(detail) => FacadeError::DirectoryNotFound(detail),
        }
    }
}
