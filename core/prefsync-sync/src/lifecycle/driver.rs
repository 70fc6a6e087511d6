//! Serialized execution of the lifecycle coordinator.

use super::coordinator::{BackendLifecycleCoordinator, LifecycleStatus};
use super::{BackendMode, LifecycleError, LifecycleResult, ShutdownReason, TransitionOutcome};
use crate::auth::TokenEvent;
use crate::bridge::SharedBridge;
use prefsync_types::{ChangeBatch, DataCategory, OwnerId};
use std::future::pending;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Commands processed by the driver, one at a time, in arrival order.
pub enum LifecycleCommand {
    RequestMode {
        target: BackendMode,
        reply: oneshot::Sender<LifecycleResult<TransitionOutcome>>,
    },
    Shutdown {
        reason: ShutdownReason,
        reply: oneshot::Sender<LifecycleResult<()>>,
    },
    BackupFinished {
        reply: oneshot::Sender<LifecycleResult<TransitionOutcome>>,
    },
    RollbackFinished {
        reply: oneshot::Sender<LifecycleResult<()>>,
    },
    ProcessIncoming {
        category: DataCategory,
        batch: ChangeBatch,
        reply: oneshot::Sender<LifecycleResult<()>>,
    },
    Storage {
        category: DataCategory,
        owner: OwnerId,
        reply: oneshot::Sender<LifecycleResult<SharedBridge>>,
    },
    RemoveOwner {
        category: DataCategory,
        owner: OwnerId,
        reply: oneshot::Sender<LifecycleResult<()>>,
    },
    UnrecoverableError {
        message: String,
        wipe: bool,
        reply: oneshot::Sender<LifecycleResult<()>>,
    },
    Status {
        reply: oneshot::Sender<LifecycleStatus>,
    },
}

/// Cloneable client of a running [`LifecycleDriver`].
#[derive(Clone)]
pub struct LifecycleHandle {
    tx: mpsc::Sender<LifecycleCommand>,
}

impl LifecycleHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LifecycleCommand,
    ) -> LifecycleResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| LifecycleError::DriverStopped)?;
        rx.await.map_err(|_| LifecycleError::DriverStopped)
    }

    pub async fn request_mode(&self, target: BackendMode) -> LifecycleResult<TransitionOutcome> {
        self.call(|reply| LifecycleCommand::RequestMode { target, reply })
            .await?
    }

    pub async fn shutdown(&self, reason: ShutdownReason) -> LifecycleResult<()> {
        self.call(|reply| LifecycleCommand::Shutdown { reason, reply })
            .await?
    }

    pub async fn backup_finished(&self) -> LifecycleResult<TransitionOutcome> {
        self.call(|reply| LifecycleCommand::BackupFinished { reply })
            .await?
    }

    pub async fn rollback_finished(&self) -> LifecycleResult<()> {
        self.call(|reply| LifecycleCommand::RollbackFinished { reply })
            .await?
    }

    pub async fn process_incoming(
        &self,
        category: DataCategory,
        batch: ChangeBatch,
    ) -> LifecycleResult<()> {
        self.call(|reply| LifecycleCommand::ProcessIncoming {
            category,
            batch,
            reply,
        })
        .await?
    }

    /// Returns the bridge of `owner` in `category` for local API calls.
    pub async fn storage(
        &self,
        category: DataCategory,
        owner: OwnerId,
    ) -> LifecycleResult<SharedBridge> {
        self.call(|reply| LifecycleCommand::Storage {
            category,
            owner,
            reply,
        })
        .await?
    }

    pub async fn remove_owner(&self, category: DataCategory, owner: OwnerId) -> LifecycleResult<()> {
        self.call(|reply| LifecycleCommand::RemoveOwner {
            category,
            owner,
            reply,
        })
        .await?
    }

    pub async fn unrecoverable_error(
        &self,
        message: impl Into<String>,
        wipe: bool,
    ) -> LifecycleResult<()> {
        let message = message.into();
        self.call(|reply| LifecycleCommand::UnrecoverableError {
            message,
            wipe,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> LifecycleResult<LifecycleStatus> {
        self.call(|reply| LifecycleCommand::Status { reply }).await
    }
}

/// Owns a [`BackendLifecycleCoordinator`] on its own task.
///
/// Also consumes the token service's events: a published credential starts
/// deferred sync categories and a permanent auth failure is recorded.
pub struct LifecycleDriver {
    coordinator: BackendLifecycleCoordinator,
    commands: mpsc::Receiver<LifecycleCommand>,
    token_events: Option<mpsc::UnboundedReceiver<TokenEvent>>,
}

impl LifecycleDriver {
    /// Spawns the driver. It shuts the backend down with
    /// [`ShutdownReason::ProcessExit`] once every handle has been dropped.
    pub fn spawn(
        coordinator: BackendLifecycleCoordinator,
        token_events: Option<mpsc::UnboundedReceiver<TokenEvent>>,
    ) -> (LifecycleHandle, JoinHandle<()>) {
        let (tx, commands) = mpsc::channel(64);
        let driver = Self {
            coordinator,
            commands,
            token_events,
        };
        let task = tokio::spawn(driver.run());
        (LifecycleHandle { tx }, task)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                event = next_event(&mut self.token_events) => match event {
                    Some(event) => self.on_token_event(event).await,
                    None => self.token_events = None,
                },
            }
        }

        if let Err(e) = self.coordinator.shutdown(ShutdownReason::ProcessExit).await {
            warn!("Shutdown on exit failed: {}", e);
        }
        debug!("Lifecycle driver stopped");
    }

    async fn handle(&mut self, command: LifecycleCommand) {
        let coordinator = &mut self.coordinator;
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            LifecycleCommand::RequestMode { target, reply } => {
                let _ = reply.send(coordinator.request_mode(target).await);
            }
            LifecycleCommand::Shutdown { reason, reply } => {
                let _ = reply.send(coordinator.shutdown(reason).await);
            }
            LifecycleCommand::BackupFinished { reply } => {
                let _ = reply.send(coordinator.backup_finished().await);
            }
            LifecycleCommand::RollbackFinished { reply } => {
                let _ = reply.send(coordinator.rollback_finished().await);
            }
            LifecycleCommand::ProcessIncoming {
                category,
                batch,
                reply,
            } => {
                let _ = reply.send(coordinator.process_incoming(&category, batch).await);
            }
            LifecycleCommand::Storage {
                category,
                owner,
                reply,
            } => {
                let _ = reply.send(coordinator.storage(&category, &owner).await);
            }
            LifecycleCommand::RemoveOwner {
                category,
                owner,
                reply,
            } => {
                let _ = reply.send(coordinator.remove_owner(&category, &owner).await);
            }
            LifecycleCommand::UnrecoverableError {
                message,
                wipe,
                reply,
            } => {
                let _ = reply.send(coordinator.on_unrecoverable_error(message, wipe).await);
            }
            LifecycleCommand::Status { reply } => {
                let _ = reply.send(coordinator.status());
            }
        }
    }

    async fn on_token_event(&mut self, event: TokenEvent) {
        match event {
            TokenEvent::Acquired => self.coordinator.on_credential_available().await,
            TokenEvent::AuthError(e) => self.coordinator.on_auth_error(e),
            TokenEvent::RetryScheduled(delay) => {
                debug!("Token retry scheduled in {:?}", delay);
            }
        }
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TokenEvent>>,
) -> Option<TokenEvent> {
    match events {
        Some(events) => events.recv().await,
        None => pending().await,
    }
}
