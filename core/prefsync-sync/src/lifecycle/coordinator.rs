//! The backend mode state machine.

use super::{
    BackendMode, LifecycleConfig, LifecycleError, LifecycleResult, ShutdownReason,
    TransitionOutcome, TransportFactory,
};
use crate::auth::{AuthError, TokenHandle};
use crate::bridge::SharedBridge;
use crate::coordinator::{DataCategoryCoordinator, DefaultErrorFactory, ErrorFactory};
use crate::observer::ObserverList;
use crate::processor::{ProcessorFactory, SharedProcessorFactory};
use crate::quota::QuotaPolicy;
use prefsync_storage::StoreFactory;
use prefsync_types::{ChangeBatch, Credential, DataCategory, OwnerId};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Point-in-time view of the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleStatus {
    pub mode: BackendMode,
    pub backup_finished: bool,
    /// Sync was entered but categories wait for a credential.
    pub awaiting_credential: bool,
    /// Categories currently syncing.
    pub running: Vec<DataCategory>,
    /// Categories that failed to start in the current mode, with the reason.
    pub failed: BTreeMap<DataCategory, String>,
    pub auth_error: Option<AuthError>,
    pub unrecoverable_error: Option<String>,
}

/// Owns the backend mode of one profile.
///
/// Not internally synchronized: run it through a
/// [`LifecycleDriver`](super::LifecycleDriver) to share it.
pub struct BackendLifecycleCoordinator {
    config: LifecycleConfig,
    store_factory: Arc<dyn StoreFactory>,
    transport: Arc<dyn TransportFactory>,
    credentials: watch::Receiver<Option<Credential>>,
    token: Option<TokenHandle>,
    quota: QuotaPolicy,
    error_factory: Arc<dyn ErrorFactory>,
    observers: Arc<ObserverList>,
    registered: Vec<DataCategory>,

    mode: BackendMode,
    backup_finished: bool,
    /// Sync was requested while a backup was still needed.
    sync_pending: bool,
    awaiting_credential: bool,
    coordinators: BTreeMap<DataCategory, Arc<DataCategoryCoordinator>>,
    running: BTreeSet<DataCategory>,
    failed: BTreeMap<DataCategory, String>,
    auth_error: Option<AuthError>,
    unrecoverable: Option<String>,
}

impl BackendLifecycleCoordinator {
    pub fn new(
        config: LifecycleConfig,
        store_factory: Arc<dyn StoreFactory>,
        transport: Arc<dyn TransportFactory>,
        credentials: watch::Receiver<Option<Credential>>,
    ) -> Self {
        let registered = config.sync_categories.clone();
        Self {
            config,
            store_factory,
            transport,
            credentials,
            token: None,
            quota: QuotaPolicy::default(),
            error_factory: Arc::new(DefaultErrorFactory),
            observers: Arc::new(ObserverList::new()),
            registered,
            mode: BackendMode::Idle,
            backup_finished: false,
            sync_pending: false,
            awaiting_credential: false,
            coordinators: BTreeMap::new(),
            running: BTreeSet::new(),
            failed: BTreeMap::new(),
            auth_error: None,
            unrecoverable: None,
        }
    }

    pub fn with_quota(mut self, quota: QuotaPolicy) -> Self {
        self.quota = quota;
        self
    }

    /// Lets the coordinator ask for a token when sync needs one and release
    /// it on shutdown.
    pub fn with_token_handle(mut self, token: TokenHandle) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_error_factory(mut self, error_factory: Arc<dyn ErrorFactory>) -> Self {
        self.error_factory = error_factory;
        self
    }

    /// Adds a category to the sync set. Takes effect the next time sync
    /// starts.
    pub fn register_category(&mut self, category: DataCategory) {
        if !self.registered.contains(&category) {
            self.registered.push(category);
        }
    }

    /// Observers notified of every settings change in every category.
    pub fn observers(&self) -> Arc<ObserverList> {
        self.observers.clone()
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    pub fn needs_backup(&self) -> bool {
        self.config.need_backup
    }

    pub fn status(&self) -> LifecycleStatus {
        LifecycleStatus {
            mode: self.mode,
            backup_finished: self.backup_finished,
            awaiting_credential: self.awaiting_credential,
            running: self.running.iter().cloned().collect(),
            failed: self.failed.clone(),
            auth_error: self.auth_error.clone(),
            unrecoverable_error: self.unrecoverable.clone(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Switches the backend to `target` if the transition rules allow it.
    ///
    /// Leaving sync requires [`shutdown`](Self::shutdown) first. A rollback
    /// blocks every request until it completes. An unfinished backup blocks
    /// everything except sync, which either proceeds (no backup needed) or
    /// is queued behind the backup.
    pub async fn request_mode(&mut self, target: BackendMode) -> LifecycleResult<TransitionOutcome> {
        if let Some(reason) = &self.unrecoverable {
            return Err(LifecycleError::Unrecoverable(reason.clone()));
        }
        if target == BackendMode::Idle {
            return Err(LifecycleError::Forbidden {
                from: self.mode,
                to: target,
            });
        }
        if target == self.mode {
            return Ok(TransitionOutcome::Unchanged);
        }

        match self.mode {
            BackendMode::Sync => {
                return Err(LifecycleError::Forbidden {
                    from: self.mode,
                    to: target,
                });
            }
            BackendMode::Rollback => return Err(LifecycleError::RollbackInProgress),
            BackendMode::Backup if !self.backup_finished => {
                if target != BackendMode::Sync {
                    return Err(LifecycleError::BackupInProgress);
                }
                if self.needs_backup() {
                    debug!("Sync requested during backup, starting it afterwards");
                    self.sync_pending = true;
                    return Ok(TransitionOutcome::BackupFirst);
                }
            }
            BackendMode::Idle
                if target == BackendMode::Sync && self.needs_backup() && !self.backup_finished =>
            {
                info!("Backup required before sync");
                self.sync_pending = true;
                self.enter(BackendMode::Backup).await?;
                return Ok(TransitionOutcome::BackupFirst);
            }
            _ => {}
        }

        if self.mode != BackendMode::Idle {
            let reason = if target == BackendMode::Sync {
                ShutdownReason::SwitchMode
            } else {
                ShutdownReason::StopSync
            };
            self.shutdown(reason).await?;
        }
        self.enter(target).await?;
        Ok(TransitionOutcome::Entered(target))
    }

    async fn enter(&mut self, mode: BackendMode) -> LifecycleResult<()> {
        let dir = self.config.mode_dir(mode);
        if mode == BackendMode::Backup {
            remove_dir_if_exists(&dir).await?;
            self.backup_finished = false;
        }
        tokio::fs::create_dir_all(&dir).await?;

        info!("Backend entering {} mode", mode);
        self.mode = mode;
        self.failed.clear();

        if mode == BackendMode::Sync {
            self.sync_pending = false;
            if self.credentials.borrow().is_none() {
                debug!("No credential yet, deferring category startup");
                self.awaiting_credential = true;
                if let Some(token) = &self.token {
                    if let Err(e) = token.request_token() {
                        warn!("Could not request a token: {}", e);
                    }
                }
                return Ok(());
            }
        }
        self.start_categories().await;
        Ok(())
    }

    fn categories_for(&self, mode: BackendMode) -> Vec<DataCategory> {
        match mode {
            BackendMode::Sync => self.registered.clone(),
            BackendMode::Backup | BackendMode::Rollback => self.config.backup_categories.clone(),
            BackendMode::Idle => Vec::new(),
        }
    }

    fn coordinator(&mut self, category: &DataCategory) -> Arc<DataCategoryCoordinator> {
        self.coordinators
            .entry(category.clone())
            .or_insert_with(|| {
                Arc::new(DataCategoryCoordinator::new(
                    category.clone(),
                    self.store_factory.clone(),
                    self.quota,
                    self.observers.clone(),
                ))
            })
            .clone()
    }

    /// Merges and starts every category of the current mode. A category
    /// that cannot be fetched or merged is recorded as failed; the others
    /// start anyway.
    async fn start_categories(&mut self) {
        let mode = self.mode;
        let categories = self.categories_for(mode);
        let credential = self.credentials.borrow().clone();
        let dir = self.config.mode_dir(mode);

        let processor = match self
            .transport
            .create_processor(mode, credential.as_ref(), &dir)
        {
            Ok(processor) => processor,
            Err(e) => {
                error!("Could not create {} transport: {}", mode, e);
                for category in categories {
                    self.failed.insert(category, e.to_string());
                }
                return;
            }
        };
        let factory: Arc<dyn ProcessorFactory> =
            Arc::new(SharedProcessorFactory::new(processor.clone()));

        for category in categories {
            let coordinator = self.coordinator(&category);
            let remote = match processor.fetch_all(&category).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!("Could not fetch remote data of {}: {}", category, e);
                    self.failed.insert(category, e.to_string());
                    continue;
                }
            };
            match coordinator
                .merge_and_start_syncing(&category, remote, factory.clone(), &*self.error_factory)
                .await
            {
                Ok(outcome) => {
                    if !outcome.disabled.is_empty() {
                        warn!(
                            "{} owner(s) of {} disabled during merge",
                            outcome.disabled.len(),
                            category
                        );
                    }
                    self.running.insert(category);
                }
                Err(e) => {
                    warn!("Could not start {}: {}", category, e);
                    self.failed.insert(category, e.to_string());
                }
            }
        }
    }

    /// Starts the deferred categories once a credential is published.
    pub async fn on_credential_available(&mut self) {
        self.auth_error = None;
        if self.mode != BackendMode::Sync || !self.awaiting_credential {
            return;
        }
        if self.credentials.borrow().is_none() {
            return;
        }
        info!("Credential available, starting sync categories");
        self.awaiting_credential = false;
        self.start_categories().await;
    }

    /// Records a permanent authentication failure.
    pub fn on_auth_error(&mut self, error: AuthError) {
        warn!("Sync authentication failed: {}", error);
        self.auth_error = Some(error);
    }

    /// Stops the current mode and returns to idle.
    pub async fn shutdown(&mut self, reason: ShutdownReason) -> LifecycleResult<()> {
        let previous = self.mode;
        info!("Shutting down {} backend ({:?})", previous, reason);

        for category in std::mem::take(&mut self.running) {
            if let Some(coordinator) = self.coordinators.get(&category) {
                if let Err(e) = coordinator.stop_syncing(&category).await {
                    warn!("Could not stop {}: {}", category, e);
                }
            }
        }
        self.awaiting_credential = false;

        if reason != ShutdownReason::SwitchMode {
            self.sync_pending = false;
            if let Some(token) = &self.token {
                if let Err(e) = token.release().await {
                    debug!("Token service gone while releasing: {}", e);
                }
            }
        }
        if previous == BackendMode::Backup {
            self.backup_finished = true;
        }
        if reason == ShutdownReason::DisableSync {
            self.unrecoverable = None;
            remove_dir_if_exists(&self.config.mode_dir(previous)).await?;
        }
        if reason == ShutdownReason::ProcessExit {
            self.coordinators.clear();
        }

        self.mode = BackendMode::Idle;
        Ok(())
    }

    /// Reports that the backup pass completed. Starts sync if it was
    /// queued behind the backup.
    pub async fn backup_finished(&mut self) -> LifecycleResult<TransitionOutcome> {
        info!("Backup finished");
        self.backup_finished = true;
        if self.sync_pending {
            self.sync_pending = false;
            return self.request_mode(BackendMode::Sync).await;
        }
        Ok(TransitionOutcome::Unchanged)
    }

    /// Reports that rollback completed. Sync is disabled afterwards.
    pub async fn rollback_finished(&mut self) -> LifecycleResult<()> {
        if self.mode != BackendMode::Rollback {
            debug!("Rollback finished outside rollback mode, ignoring");
            return Ok(());
        }
        info!("Rollback finished");
        self.shutdown(ShutdownReason::DisableSync).await
    }

    /// Shuts the backend down after an error it cannot recover from.
    ///
    /// Further mode requests fail until sync is disabled explicitly.
    pub async fn on_unrecoverable_error(
        &mut self,
        message: impl Into<String>,
        wipe: bool,
    ) -> LifecycleResult<()> {
        let message = message.into();
        error!("Unrecoverable sync error: {}", message);
        let reason = if wipe {
            ShutdownReason::DisableSync
        } else {
            ShutdownReason::StopSync
        };
        let result = self.shutdown(reason).await;
        self.unrecoverable = Some(message);
        result
    }

    // ── Category access ──────────────────────────────────────────

    /// Routes a batch from the remote service to its category.
    pub async fn process_incoming(
        &mut self,
        category: &DataCategory,
        batch: ChangeBatch,
    ) -> LifecycleResult<()> {
        let coordinator = self.coordinator(category);
        Ok(coordinator.process_incoming(category, batch).await?)
    }

    /// Returns the bridge of `owner` in `category`, creating both on first
    /// access.
    pub async fn storage(
        &mut self,
        category: &DataCategory,
        owner: &OwnerId,
    ) -> LifecycleResult<SharedBridge> {
        let coordinator = self.coordinator(category);
        Ok(coordinator.storage(owner).await?)
    }

    /// Deletes the local settings of `owner` in `category`.
    pub async fn remove_owner(
        &mut self,
        category: &DataCategory,
        owner: &OwnerId,
    ) -> LifecycleResult<()> {
        let coordinator = self.coordinator(category);
        Ok(coordinator.remove_owner(owner).await?)
    }
}

async fn remove_dir_if_exists(dir: &Path) -> LifecycleResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            debug!("Removed {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
