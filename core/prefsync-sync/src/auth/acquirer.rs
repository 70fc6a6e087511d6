//! Token request state machine.
//!
//! The acquirer does no I/O. Its driver asks it for a [`TokenRequest`],
//! performs the request, and reports the result back with
//! [`TokenAcquirer::complete`], which decides what happens next.

use super::AuthError;
use super::backoff::{Backoff, BackoffPolicy};
use prefsync_types::Credential;
use std::time::Duration;
use tracing::debug;

/// A request the driver should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    /// Matches the request to its completion.
    pub id: u64,
    pub scopes: Vec<String>,
    /// Previous token, to invalidate before acquiring a new one.
    pub stale_token: Option<String>,
}

/// What the driver should do after a request completed.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenOutcome {
    /// The token is cached; publish it.
    Acquired(Credential),
    /// Transient failure, request again immediately.
    RetryNow,
    /// Transient failure, request again after the delay.
    RetryAfter(Duration),
    /// Permanent failure; no retry until the credentials are refreshed.
    Failed(AuthError),
}

pub struct TokenAcquirer {
    scopes: Vec<String>,
    backoff: Backoff,
    credential: Option<Credential>,
    next_id: u64,
    in_flight: Option<u64>,
    /// The first transient failure after a success or reset retries at once.
    immediate_retry_used: bool,
    auth_error: Option<AuthError>,
}

impl TokenAcquirer {
    pub fn new(scopes: Vec<String>, policy: BackoffPolicy) -> Self {
        Self {
            scopes,
            backoff: Backoff::new(policy),
            credential: None,
            next_id: 0,
            in_flight: None,
            immediate_retry_used: false,
            auth_error: None,
        }
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// The permanent error reported by the last request, if any.
    pub fn auth_error(&self) -> Option<&AuthError> {
        self.auth_error.as_ref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn failure_count(&self) -> u32 {
        self.backoff.failure_count()
    }

    /// Starts a request unless one is already outstanding or a permanent
    /// auth error is pending.
    ///
    /// A cached token is dropped and returned as `stale_token` so the driver
    /// can invalidate it first. Only [`credentials_refreshed`] clears the
    /// auth error.
    ///
    /// [`credentials_refreshed`]: TokenAcquirer::credentials_refreshed
    pub fn begin_request(&mut self) -> Option<TokenRequest> {
        if let Some(e) = &self.auth_error {
            debug!("Token request blocked until credentials are refreshed: {}", e);
            return None;
        }
        if self.in_flight.is_some() {
            debug!("Token request already in flight");
            return None;
        }
        self.next_id += 1;
        self.in_flight = Some(self.next_id);
        Some(TokenRequest {
            id: self.next_id,
            scopes: self.scopes.clone(),
            stale_token: self.credential.take().map(|c| c.token().to_string()),
        })
    }

    /// Records the result of request `id`.
    ///
    /// Returns `None` if `id` is not the outstanding request (it was
    /// superseded or released meanwhile).
    pub fn complete(
        &mut self,
        id: u64,
        result: Result<Credential, AuthError>,
    ) -> Option<TokenOutcome> {
        if self.in_flight != Some(id) {
            debug!("Ignoring result of superseded token request {}", id);
            return None;
        }
        self.in_flight = None;

        let outcome = match result {
            Ok(credential) => {
                self.backoff.reset();
                self.immediate_retry_used = false;
                self.auth_error = None;
                self.credential = Some(credential.clone());
                TokenOutcome::Acquired(credential)
            }
            Err(e) if e.is_transient() => {
                if self.immediate_retry_used {
                    TokenOutcome::RetryAfter(self.backoff.next_delay())
                } else {
                    self.immediate_retry_used = true;
                    TokenOutcome::RetryNow
                }
            }
            Err(e) => {
                self.auth_error = Some(e.clone());
                TokenOutcome::Failed(e)
            }
        };
        Some(outcome)
    }

    /// Clears the backoff and any auth error, then requests a new token.
    ///
    /// An outstanding request is superseded.
    pub fn credentials_refreshed(&mut self) -> Option<TokenRequest> {
        self.backoff.reset();
        self.immediate_retry_used = false;
        self.auth_error = None;
        self.in_flight = None;
        self.begin_request()
    }

    /// Drops the cached token and cancels any outstanding request.
    ///
    /// Returns the token so the driver can invalidate it.
    pub fn release(&mut self) -> Option<String> {
        self.in_flight = None;
        self.credential.take().map(|c| c.token().to_string())
    }
}
