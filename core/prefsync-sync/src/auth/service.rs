//! Async driver for the token acquirer.

use super::acquirer::{TokenAcquirer, TokenOutcome, TokenRequest};
use super::backoff::BackoffPolicy;
use super::{AuthError, CredentialProvider};
use crate::error::{SyncError, SyncResult};
use prefsync_types::Credential;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Token acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Scopes requested from the credential provider.
    pub scopes: Vec<String>,
    pub backoff: BackoffPolicy,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            scopes: vec!["prefsync".to_string()],
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Emitted by the token service after each completed request.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    /// A new credential has been published.
    Acquired,
    /// A transient failure; the next request runs after the delay.
    RetryScheduled(Duration),
    /// A permanent failure; requests stop until credentials are refreshed.
    AuthError(AuthError),
}

enum Command {
    Request,
    Completed {
        id: u64,
        result: Result<Credential, AuthError>,
    },
    CredentialsRefreshed,
    Release {
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Client side of a running [`TokenService`].
#[derive(Clone)]
pub struct TokenHandle {
    tx: mpsc::UnboundedSender<Command>,
    credentials: watch::Receiver<Option<Credential>>,
}

impl TokenHandle {
    fn send(&self, command: Command) -> SyncResult<()> {
        self.tx.send(command).map_err(|_| SyncError::ChannelClosed)
    }

    /// Requests a token. No-op while a request is outstanding.
    pub fn request_token(&self) -> SyncResult<()> {
        self.send(Command::Request)
    }

    /// Clears backoff and auth errors and requests a token right away.
    pub fn credentials_refreshed(&self) -> SyncResult<()> {
        self.send(Command::CredentialsRefreshed)
    }

    /// Invalidates and forgets the current token.
    ///
    /// Returns once the published credential is cleared and the provider
    /// has invalidated the token.
    pub async fn release(&self) -> SyncResult<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Release { done })?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }

    pub fn shutdown(&self) -> SyncResult<()> {
        self.send(Command::Shutdown)
    }

    /// A receiver that always holds the current credential.
    pub fn credentials(&self) -> watch::Receiver<Option<Credential>> {
        self.credentials.clone()
    }

    /// The credential published right now.
    pub fn current(&self) -> Option<Credential> {
        self.credentials.borrow().clone()
    }
}

/// Runs a [`TokenAcquirer`] on its own task.
///
/// The service is the only writer of the published credential. Requests
/// run on spawned tasks so the service keeps accepting commands. Retries
/// are tokio timers, cancelled by any newer request.
pub struct TokenService {
    acquirer: TokenAcquirer,
    provider: Arc<dyn CredentialProvider>,
    commands: mpsc::WeakUnboundedSender<Command>,
    credential_tx: watch::Sender<Option<Credential>>,
    events: mpsc::UnboundedSender<TokenEvent>,
    retry: Option<JoinHandle<()>>,
}

impl TokenService {
    /// Spawns the service on the current runtime.
    ///
    /// The service stops on [`TokenHandle::shutdown`] or once every handle
    /// has been dropped.
    pub fn spawn(
        provider: Arc<dyn CredentialProvider>,
        config: TokenConfig,
    ) -> (TokenHandle, mpsc::UnboundedReceiver<TokenEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (credential_tx, credentials) = watch::channel(None);

        let service = Self {
            acquirer: TokenAcquirer::new(config.scopes, config.backoff),
            provider,
            commands: tx.downgrade(),
            credential_tx,
            events: event_tx,
            retry: None,
        };
        tokio::spawn(service.run(rx));

        (TokenHandle { tx, credentials }, event_rx)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Request => self.start_request(),
                Command::Completed { id, result } => self.on_completed(id, result),
                Command::CredentialsRefreshed => {
                    self.cancel_retry();
                    let request = self.acquirer.credentials_refreshed();
                    self.dispatch(request);
                }
                Command::Release { done } => {
                    self.cancel_retry();
                    // Readers must stop using the token before it goes stale.
                    self.credential_tx.send_replace(None);
                    if let Some(token) = self.acquirer.release() {
                        self.provider.invalidate(&token).await;
                        debug!("Released access token");
                    }
                    let _ = done.send(());
                }
                Command::Shutdown => break,
            }
        }
        self.cancel_retry();
        debug!("Token service stopped");
    }

    fn start_request(&mut self) {
        self.cancel_retry();
        let request = self.acquirer.begin_request();
        self.dispatch(request);
    }

    fn dispatch(&mut self, request: Option<TokenRequest>) {
        let Some(request) = request else {
            return;
        };
        if request.stale_token.is_some() {
            self.credential_tx.send_replace(None);
        }
        let commands = self.commands.clone();
        let provider = self.provider.clone();
        tokio::spawn(async move {
            if let Some(stale) = &request.stale_token {
                provider.invalidate(stale).await;
            }
            let result = provider.acquire(&request.scopes).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Completed {
                    id: request.id,
                    result,
                });
            }
        });
    }

    fn on_completed(&mut self, id: u64, result: Result<Credential, AuthError>) {
        let Some(outcome) = self.acquirer.complete(id, result) else {
            return;
        };
        match outcome {
            TokenOutcome::Acquired(credential) => {
                info!("Access token acquired");
                self.credential_tx.send_replace(Some(credential));
                let _ = self.events.send(TokenEvent::Acquired);
            }
            TokenOutcome::RetryNow => {
                debug!("Token request failed, retrying immediately");
                self.start_request();
            }
            TokenOutcome::RetryAfter(delay) => {
                info!(
                    "Token request failed {} time(s), retrying in {:?}",
                    self.acquirer.failure_count(),
                    delay
                );
                self.schedule_retry(delay);
                let _ = self.events.send(TokenEvent::RetryScheduled(delay));
            }
            TokenOutcome::Failed(e) => {
                warn!("Token request failed permanently: {}", e);
                self.credential_tx.send_replace(None);
                let _ = self.events.send(TokenEvent::AuthError(e));
            }
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        let commands = self.commands.clone();
        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Request);
            }
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}
