//! Access-token acquisition for the sync transport.
//!
//! - [`Backoff`]: retry delays
//! - [`TokenAcquirer`]: the request/retry state machine, free of I/O
//! - [`TokenService`]: a tokio task driving the acquirer against a
//!   [`CredentialProvider`] and publishing the current credential

mod acquirer;
mod backoff;
mod service;

pub use acquirer::{TokenAcquirer, TokenOutcome, TokenRequest};
pub use backoff::{Backoff, BackoffPolicy};
pub use service::{TokenConfig, TokenEvent, TokenHandle, TokenService};

use async_trait::async_trait;
use prefsync_types::Credential;
use thiserror::Error;

/// Why the credential provider could not hand out a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request canceled")]
    RequestCanceled,

    #[error("service error: {0}")]
    ServiceError(String),

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account disabled")]
    AccountDisabled,
}

impl AuthError {
    /// Transient errors are retried with backoff; the others need the user
    /// to sign in again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::RequestCanceled
                | Self::ServiceError(_)
                | Self::ServiceUnavailable
        )
    }
}

/// Supplies access tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Requests a token for `scopes`.
    async fn acquire(&self, scopes: &[String]) -> Result<Credential, AuthError>;

    /// Tells the provider `token` must not be handed out again.
    async fn invalidate(&self, token: &str);
}

/// A scripted provider for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    #[derive(Default)]
    struct Inner {
        script: VecDeque<Result<Credential, AuthError>>,
        acquire_calls: usize,
        invalidated: Vec<String>,
        invalidate_delay: Duration,
    }

    /// Answers `acquire` from a queue of scripted results.
    ///
    /// Once the queue is empty every call fails with
    /// [`AuthError::ServiceUnavailable`].
    #[derive(Default)]
    pub struct ScriptedProvider {
        inner: Mutex<Inner>,
    }

    impl ScriptedProvider {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub fn push(&self, result: Result<Credential, AuthError>) {
            self.lock().script.push_back(result);
        }

        pub fn push_token(&self, token: &str) {
            self.push(Ok(Credential::issued_now(token, chrono::Duration::hours(1))));
        }

        pub fn acquire_calls(&self) -> usize {
            self.lock().acquire_calls
        }

        /// Makes every `invalidate` call take `delay` before it completes.
        pub fn set_invalidate_delay(&self, delay: Duration) {
            self.lock().invalidate_delay = delay;
        }

        /// Tokens invalidated so far, in order.
        pub fn invalidated(&self) -> Vec<String> {
            self.lock().invalidated.clone()
        }
    }

    #[async_trait]
    impl CredentialProvider for ScriptedProvider {
        async fn acquire(&self, _scopes: &[String]) -> Result<Credential, AuthError> {
            let mut inner = self.lock();
            inner.acquire_calls += 1;
            inner
                .script
                .pop_front()
                .unwrap_or(Err(AuthError::ServiceUnavailable))
        }

        async fn invalidate(&self, token: &str) {
            let delay = self.lock().invalidate_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.lock().invalidated.push(token.to_string());
        }
    }
}
