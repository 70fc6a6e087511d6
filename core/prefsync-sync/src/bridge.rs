//! Per-owner sync bridge.
//!
//! A [`SyncBridge`] owns one owner's local store for one category. Local API
//! writes go through it and, while syncing, leave as the minimal set of
//! change records. Records from the remote service come back in through
//! [`SyncBridge::apply_incoming`].
//!
//! Any failure while syncing (a store error or a rejected send) disables the
//! bridge. A disabled bridge keeps serving local reads and writes but never
//! calls its processor again until [`SyncBridge::stop_syncing`] and a new
//! [`SyncBridge::start_syncing`].

use crate::error::{SyncError, SyncResult};
use crate::observer::{ObserverList, SettingChange, SettingsChangedEvent};
use crate::processor::SyncProcessor;
use crate::quota::QuotaPolicy;
use prefsync_storage::{SettingsMap, SettingsStore, StorageError, StorageResult};
use prefsync_types::{
    ChangeBatch, ChangeOrigin, ChangeType, DataCategory, OwnerId, SettingValue, SyncChangeRecord,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A bridge shared between the coordinator and local API callers.
///
/// The mutex serializes every call for one owner and is held across the
/// processor send, so outgoing records keep their local order.
pub type SharedBridge = Arc<Mutex<SyncBridge>>;

/// Sync state of one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    NotSyncing,
    Syncing,
    /// Sync failed; local access continues, nothing reaches the processor.
    Disabled,
}

pub struct SyncBridge {
    category: DataCategory,
    owner: OwnerId,
    store: Box<dyn SettingsStore>,
    processor: Option<Arc<dyn SyncProcessor>>,
    state: BridgeState,
    quota: QuotaPolicy,
    observers: Arc<ObserverList>,
}

impl SyncBridge {
    pub fn new(
        category: DataCategory,
        owner: OwnerId,
        store: Box<dyn SettingsStore>,
        quota: QuotaPolicy,
        observers: Arc<ObserverList>,
    ) -> Self {
        Self {
            category,
            owner,
            store,
            processor: None,
            state: BridgeState::NotSyncing,
            quota,
            observers,
        }
    }

    /// Wraps the bridge for sharing.
    pub fn shared(self) -> SharedBridge {
        Arc::new(Mutex::new(self))
    }

    pub fn category(&self) -> &DataCategory {
        &self.category
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn is_syncing(&self) -> bool {
        self.state == BridgeState::Syncing
    }

    // ── Sync control ─────────────────────────────────────────────

    /// Merges `remote` into the local store and starts forwarding changes.
    ///
    /// Keys only present remotely are written locally. Keys whose values
    /// differ take the remote value. Keys only present locally are sent as
    /// one batch of ADDs. Local writes made before a failure are kept.
    pub async fn start_syncing(
        &mut self,
        remote: SettingsMap,
        processor: Arc<dyn SyncProcessor>,
    ) -> SyncResult<()> {
        if self.state == BridgeState::Syncing {
            return Err(SyncError::AlreadySyncing {
                category: self.category.clone(),
                owner: self.owner.clone(),
            });
        }

        let local = match self.store.get_all() {
            Ok(local) => local,
            Err(e) => {
                self.disable();
                return Err(e.into());
            }
        };

        let mut changes = Vec::new();
        for (key, remote_value) in &remote {
            let old = local.get(key);
            if old == Some(remote_value) {
                continue;
            }
            if let Err(e) = self.store.set(key, remote_value) {
                self.notify(ChangeOrigin::Remote, changes);
                self.disable();
                return Err(e.into());
            }
            changes.push(SettingChange::new(
                key.clone(),
                old.cloned(),
                Some(remote_value.clone()),
            ));
        }
        self.notify(ChangeOrigin::Remote, changes);

        let outgoing: ChangeBatch = local
            .into_iter()
            .filter(|(key, _)| !remote.contains_key(key))
            .map(|(key, value)| {
                SyncChangeRecord::add(self.category.clone(), self.owner.clone(), key, value)
            })
            .collect();

        self.processor = Some(processor.clone());
        self.state = BridgeState::Syncing;
        debug!(
            "Started syncing {} in {} ({} local-only entries)",
            self.owner,
            self.category,
            outgoing.len()
        );

        if !outgoing.is_empty() {
            if let Err(e) = processor.send(outgoing).await {
                self.disable();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stops forwarding. Also re-arms a disabled bridge for a later start.
    pub fn stop_syncing(&mut self) {
        if self.state != BridgeState::NotSyncing {
            debug!("Stopped syncing {} in {}", self.owner, self.category);
        }
        self.processor = None;
        self.state = BridgeState::NotSyncing;
    }

    pub(crate) fn disable(&mut self) {
        if self.state != BridgeState::Disabled {
            warn!("Disabling sync for {} in {}", self.owner, self.category);
        }
        self.processor = None;
        self.state = BridgeState::Disabled;
    }

    /// Applies records from the remote service, in order.
    ///
    /// Does nothing unless syncing. The first failing write disables the
    /// bridge and abandons the rest of the batch. Quota is not checked.
    pub fn apply_incoming(&mut self, records: &[SyncChangeRecord]) -> SyncResult<()> {
        if self.state != BridgeState::Syncing {
            debug!(
                "Ignoring {} incoming record(s) for {}: not syncing",
                records.len(),
                self.owner
            );
            return Ok(());
        }

        let mut changes = Vec::new();
        for record in records {
            match self.apply_one(record) {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(e) => {
                    self.notify(ChangeOrigin::Remote, changes);
                    self.disable();
                    return Err(e.into());
                }
            }
        }
        self.notify(ChangeOrigin::Remote, changes);
        Ok(())
    }

    fn apply_one(&mut self, record: &SyncChangeRecord) -> StorageResult<Option<SettingChange>> {
        let key = record.key();
        let old = self.store.get(&[key.to_string()])?.remove(key);
        match record.change_type() {
            // ADD of an existing key and UPDATE of a missing one are both upserts.
            ChangeType::Add | ChangeType::Update => {
                if old.as_ref() == Some(record.value()) {
                    return Ok(None);
                }
                self.store.set(key, record.value())?;
                Ok(Some(SettingChange::new(key, old, Some(record.value().clone()))))
            }
            ChangeType::Delete => {
                if old.is_none() {
                    return Ok(None);
                }
                self.store.remove(&[key.to_string()])?;
                Ok(Some(SettingChange::new(key, old, None)))
            }
        }
    }

    // ── Local API ────────────────────────────────────────────────

    /// Returns the entries for `keys` that exist.
    pub fn get(&self, keys: &[String]) -> SyncResult<SettingsMap> {
        Ok(self.store.get(keys)?)
    }

    pub fn get_all(&self) -> SyncResult<SettingsMap> {
        Ok(self.store.get_all()?)
    }

    pub fn bytes_in_use(&self, keys: Option<&[String]>) -> SyncResult<usize> {
        Ok(self.store.bytes_in_use(keys)?)
    }

    /// Writes one setting and forwards an ADD or UPDATE.
    ///
    /// Rejected with [`SyncError::QuotaExceeded`] before anything is written
    /// if the value breaks the quota policy. Writing an unchanged value is a
    /// no-op.
    pub async fn set(&mut self, key: &str, value: SettingValue) -> SyncResult<()> {
        let current = self.store.get_all().map_err(|e| self.storage_failed(e))?;
        self.quota
            .check_set(key, &value, &current)
            .map_err(|reason| SyncError::QuotaExceeded {
                key: key.to_string(),
                reason,
            })?;

        let old = current.get(key).cloned();
        if old.as_ref() == Some(&value) {
            return Ok(());
        }
        self.store
            .set(key, &value)
            .map_err(|e| self.storage_failed(e))?;

        let record = if old.is_some() {
            SyncChangeRecord::update(self.category.clone(), self.owner.clone(), key, value.clone())
        } else {
            SyncChangeRecord::add(self.category.clone(), self.owner.clone(), key, value.clone())
        };
        self.notify(
            ChangeOrigin::Local,
            vec![SettingChange::new(key, old, Some(value))],
        );
        self.forward(vec![record]).await;
        Ok(())
    }

    /// Removes one setting.
    pub async fn remove(&mut self, key: &str) -> SyncResult<()> {
        self.remove_many(&[key.to_string()]).await
    }

    /// Removes `keys` and forwards one DELETE per key that existed.
    pub async fn remove_many(&mut self, keys: &[String]) -> SyncResult<()> {
        let existing = self.store.get(keys).map_err(|e| self.storage_failed(e))?;
        if existing.is_empty() {
            return Ok(());
        }
        let removed: Vec<String> = existing.keys().cloned().collect();
        self.store
            .remove(&removed)
            .map_err(|e| self.storage_failed(e))?;
        self.finish_removal(existing).await;
        Ok(())
    }

    /// Removes every setting and forwards one DELETE per removed key.
    pub async fn clear(&mut self) -> SyncResult<()> {
        let existing = self.store.get_all().map_err(|e| self.storage_failed(e))?;
        if existing.is_empty() {
            return Ok(());
        }
        self.store.clear().map_err(|e| self.storage_failed(e))?;
        self.finish_removal(existing).await;
        Ok(())
    }

    async fn finish_removal(&mut self, removed: SettingsMap) {
        let mut records = Vec::with_capacity(removed.len());
        let mut changes = Vec::with_capacity(removed.len());
        for (key, old) in removed {
            records.push(SyncChangeRecord::delete(
                self.category.clone(),
                self.owner.clone(),
                key.clone(),
            ));
            changes.push(SettingChange::new(key, Some(old), None));
        }
        self.notify(ChangeOrigin::Local, changes);
        self.forward(records).await;
    }

    // ── Internals ────────────────────────────────────────────────

    /// Sends `batch` if syncing. A failed send disables the bridge; the
    /// local change that produced the batch stays.
    async fn forward(&mut self, batch: ChangeBatch) {
        if batch.is_empty() || self.state != BridgeState::Syncing {
            return;
        }
        let Some(processor) = self.processor.clone() else {
            return;
        };
        if let Err(e) = processor.send(batch).await {
            warn!(
                "Failed to forward changes for {} in {}: {}",
                self.owner, self.category, e
            );
            self.disable();
        }
    }

    fn storage_failed(&mut self, e: StorageError) -> SyncError {
        if self.state == BridgeState::Syncing {
            warn!(
                "Local store of {} in {} failed: {}",
                self.owner, self.category, e
            );
            self.disable();
        }
        e.into()
    }

    fn notify(&self, origin: ChangeOrigin, changes: Vec<SettingChange>) {
        if changes.is_empty() {
            return;
        }
        self.observers.notify(&SettingsChangedEvent {
            category: self.category.clone(),
            owner: self.owner.clone(),
            origin,
            changes,
        });
    }
}
