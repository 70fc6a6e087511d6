//! Access credentials for the remote synchronization service.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An access token plus the times it was acquired and is expected to expire.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    token: String,
    acquired_at: DateTime<Utc>,
    expires_hint: DateTime<Utc>,
}

impl Credential {
    /// Creates a credential from its parts.
    pub fn new(
        token: impl Into<String>,
        acquired_at: DateTime<Utc>,
        expires_hint: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            acquired_at,
            expires_hint,
        }
    }

    /// Creates a credential acquired now and valid for `lifetime`.
    pub fn issued_now(token: impl Into<String>, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self::new(token, now, now + lifetime)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn expires_hint(&self) -> DateTime<Utc> {
        self.expires_hint
    }

    /// Returns true if the expiry hint is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_hint <= now
    }
}

// Tokens never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("acquired_at", &self.acquired_at)
            .field("expires_hint", &self.expires_hint)
            .finish()
    }
}
