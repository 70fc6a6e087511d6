//! Per-category orchestration of sync bridges.

use crate::bridge::{SharedBridge, SyncBridge};
use crate::error::{SyncError, SyncResult};
use crate::observer::ObserverList;
use crate::processor::ProcessorFactory;
use crate::quota::QuotaPolicy;
use prefsync_storage::{SettingsMap, StoreFactory};
use prefsync_types::{ChangeBatch, DataCategory, OwnerId, SettingEntity, SyncChangeRecord};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Builds the errors a coordinator reports for category-level failures.
pub trait ErrorFactory: Send + Sync {
    fn create_error(&self, category: &DataCategory, message: &str) -> SyncError;
}

/// Produces [`SyncError::Category`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorFactory;

impl ErrorFactory for DefaultErrorFactory {
    fn create_error(&self, category: &DataCategory, message: &str) -> SyncError {
        SyncError::Category {
            category: category.clone(),
            message: message.to_string(),
        }
    }
}

/// Which owners a merge started and which it had to disable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub started: Vec<OwnerId>,
    pub disabled: Vec<OwnerId>,
}

/// Owns one [`SyncBridge`] per owner of a data category.
///
/// Bridges are created on first access and live until [`remove_owner`]
/// or until the coordinator is dropped. Stopping sync leaves them usable
/// for local access.
///
/// [`remove_owner`]: DataCategoryCoordinator::remove_owner
pub struct DataCategoryCoordinator {
    category: DataCategory,
    store_factory: Arc<dyn StoreFactory>,
    quota: QuotaPolicy,
    observers: Arc<ObserverList>,
    bridges: RwLock<HashMap<OwnerId, SharedBridge>>,
    /// Set while the category is syncing.
    processors: RwLock<Option<Arc<dyn ProcessorFactory>>>,
}

impl DataCategoryCoordinator {
    pub fn new(
        category: DataCategory,
        store_factory: Arc<dyn StoreFactory>,
        quota: QuotaPolicy,
        observers: Arc<ObserverList>,
    ) -> Self {
        Self {
            category,
            store_factory,
            quota,
            observers,
            bridges: RwLock::new(HashMap::new()),
            processors: RwLock::new(None),
        }
    }

    pub fn category(&self) -> &DataCategory {
        &self.category
    }

    pub async fn is_syncing(&self) -> bool {
        self.processors.read().await.is_some()
    }

    /// Owners with a live bridge, sorted.
    pub async fn owners(&self) -> Vec<OwnerId> {
        let mut owners: Vec<OwnerId> = self.bridges.read().await.keys().cloned().collect();
        owners.sort();
        owners
    }

    /// Returns the bridge of `owner`, creating it on first access.
    ///
    /// A bridge created while the category is syncing starts syncing right
    /// away with an empty remote view, so its local entries are pushed.
    pub async fn storage(&self, owner: &OwnerId) -> SyncResult<SharedBridge> {
        let (bridge, created) = self.open_bridge(owner).await?;
        if created {
            let factory = self.processors.read().await.clone();
            if let Some(factory) = factory {
                let mut guard = bridge.lock().await;
                if let Err(e) = guard
                    .start_syncing(SettingsMap::new(), factory.processor_for(owner))
                    .await
                {
                    warn!("Failed to start syncing new owner {}: {}", owner, e);
                }
            }
        }
        Ok(bridge)
    }

    async fn open_bridge(&self, owner: &OwnerId) -> SyncResult<(SharedBridge, bool)> {
        if let Some(bridge) = self.bridges.read().await.get(owner) {
            return Ok((bridge.clone(), false));
        }

        let mut bridges = self.bridges.write().await;
        // Another caller may have created it while we waited for the lock.
        if let Some(bridge) = bridges.get(owner) {
            return Ok((bridge.clone(), false));
        }
        let store = self.store_factory.open(&self.category, owner)?;
        let bridge = SyncBridge::new(
            self.category.clone(),
            owner.clone(),
            store,
            self.quota,
            self.observers.clone(),
        )
        .shared();
        bridges.insert(owner.clone(), bridge.clone());
        debug!("Created bridge for {} in {}", owner, self.category);
        Ok((bridge, true))
    }

    fn check_category(&self, category: &DataCategory) -> SyncResult<()> {
        if category != &self.category {
            return Err(SyncError::CategoryMismatch {
                expected: self.category.clone(),
                actual: category.clone(),
            });
        }
        Ok(())
    }

    /// Merges the remote entities of the category and starts every owner.
    ///
    /// Covers owners with a live bridge, owners named in `remote_entities`
    /// and owners the store factory already has data for. An owner that
    /// fails to start is disabled on its own; the others start regardless.
    pub async fn merge_and_start_syncing(
        &self,
        category: &DataCategory,
        remote_entities: Vec<SettingEntity>,
        processor_factory: Arc<dyn ProcessorFactory>,
        error_factory: &dyn ErrorFactory,
    ) -> SyncResult<MergeOutcome> {
        if category != &self.category {
            return Err(error_factory.create_error(
                &self.category,
                &format!("cannot merge data of {category}"),
            ));
        }
        {
            let mut processors = self.processors.write().await;
            if processors.is_some() {
                return Err(error_factory.create_error(category, "already syncing"));
            }
            *processors = Some(processor_factory.clone());
        }

        let mut remote: BTreeMap<OwnerId, SettingsMap> = BTreeMap::new();
        for entity in remote_entities {
            remote
                .entry(entity.owner)
                .or_default()
                .insert(entity.key, entity.value);
        }

        let mut owners: BTreeSet<OwnerId> = self.bridges.read().await.keys().cloned().collect();
        owners.extend(remote.keys().cloned());
        match self.store_factory.known_owners(category) {
            Ok(known) => owners.extend(known),
            Err(e) => warn!("Could not list local owners of {}: {}", category, e),
        }

        let mut outcome = MergeOutcome::default();
        for owner in owners {
            let snapshot = remote.remove(&owner).unwrap_or_default();
            let bridge = match self.open_bridge(&owner).await {
                Ok((bridge, _)) => bridge,
                Err(e) => {
                    warn!("Could not open store of {} in {}: {}", owner, category, e);
                    outcome.disabled.push(owner);
                    continue;
                }
            };

            let mut guard = bridge.lock().await;
            match guard
                .start_syncing(snapshot, processor_factory.processor_for(&owner))
                .await
            {
                Ok(()) | Err(SyncError::AlreadySyncing { .. }) => outcome.started.push(owner),
                Err(e) => {
                    warn!("Failed to start syncing {} in {}: {}", owner, category, e);
                    guard.disable();
                    outcome.disabled.push(owner);
                }
            }
        }

        info!(
            "Started syncing {}: {} owner(s) started, {} disabled",
            category,
            outcome.started.len(),
            outcome.disabled.len()
        );
        Ok(outcome)
    }

    /// Stops every bridge of the category. Bridges stay usable locally.
    pub async fn stop_syncing(&self, category: &DataCategory) -> SyncResult<()> {
        self.check_category(category)?;
        *self.processors.write().await = None;

        let bridges: Vec<SharedBridge> = self.bridges.read().await.values().cloned().collect();
        for bridge in bridges {
            bridge.lock().await.stop_syncing();
        }
        info!("Stopped syncing {}", category);
        Ok(())
    }

    /// Routes incoming records to their owners, keeping per-owner order.
    ///
    /// Every owner is processed even if an earlier one fails; failures are
    /// reported together as [`SyncError::PartialFailure`].
    pub async fn process_incoming(
        &self,
        category: &DataCategory,
        batch: ChangeBatch,
    ) -> SyncResult<()> {
        self.check_category(category)?;
        if let Some(record) = batch.iter().find(|r| r.category() != &self.category) {
            return Err(SyncError::CategoryMismatch {
                expected: self.category.clone(),
                actual: record.category().clone(),
            });
        }
        if !self.is_syncing().await {
            return Err(SyncError::NotSyncing {
                category: category.clone(),
            });
        }

        let mut by_owner: BTreeMap<OwnerId, Vec<SyncChangeRecord>> = BTreeMap::new();
        for record in batch {
            by_owner.entry(record.owner().clone()).or_default().push(record);
        }

        let mut failures = Vec::new();
        for (owner, records) in by_owner {
            let result = match self.storage(&owner).await {
                Ok(bridge) => {
                    let mut guard = bridge.lock().await;
                    guard.apply_incoming(&records)
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Incoming changes for {} in {} failed: {}", owner, category, e);
                failures.push((owner, e.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::PartialFailure {
                category: category.clone(),
                failures,
            })
        }
    }

    /// Every entry of every syncing owner. Owners whose store cannot be
    /// read are skipped.
    pub async fn snapshot_all(&self, category: &DataCategory) -> SyncResult<Vec<SettingEntity>> {
        self.check_category(category)?;

        let mut bridges: Vec<(OwnerId, SharedBridge)> = self
            .bridges
            .read()
            .await
            .iter()
            .map(|(owner, bridge)| (owner.clone(), bridge.clone()))
            .collect();
        bridges.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entities = Vec::new();
        for (owner, bridge) in bridges {
            let guard = bridge.lock().await;
            if !guard.is_syncing() {
                continue;
            }
            match guard.get_all() {
                Ok(entries) => entities.extend(
                    entries
                        .into_iter()
                        .map(|(key, value)| SettingEntity::new(owner.clone(), key, value)),
                ),
                Err(e) => warn!("Skipping {} in snapshot of {}: {}", owner, category, e),
            }
        }
        Ok(entities)
    }

    /// Drops the bridge of `owner` and deletes its local settings.
    ///
    /// The deletion is local only; no DELETE records are sent.
    pub async fn remove_owner(&self, owner: &OwnerId) -> SyncResult<()> {
        let removed = self.bridges.write().await.remove(owner);
        match removed {
            Some(bridge) => {
                let mut guard = bridge.lock().await;
                guard.stop_syncing();
                guard.clear().await?;
            }
            None => self.store_factory.open(&self.category, owner)?.clear()?,
        }
        debug!("Removed {} from {}", owner, self.category);
        Ok(())
    }
}
