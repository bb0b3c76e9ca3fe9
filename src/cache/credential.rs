use std::fmt;

use chrono::{DateTime, Duration, Utc};

/// Bearer access token plus its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { access_token: access_token.into(), expires_at }
    }

    /// Builds a credential from an OAuth `expires_in` (seconds from now).
    pub fn expiring_in(access_token: impl Into<String>, expires_in_seconds: i64) -> Self {
        Self::new(access_token, Utc::now() + Duration::seconds(expires_in_seconds))
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// A credential inside the safety margin of its expiry is treated as stale.
    pub fn is_fresh(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        now + safety_margin < self.expires_at
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
