//! In-memory stores with failure injection.

use crate::store::{SettingsMap, SettingsStore, StoreFactory};
use crate::{StorageError, StorageResult};
use prefsync_types::{DataCategory, OwnerId, SettingValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared flag that makes a [`MemoryStore`] fail every operation while set.
#[derive(Debug, Clone, Default)]
pub struct FailureSwitch(Arc<AtomicBool>);

impl FailureSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.store(failing, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: SettingsMap,
    failure: FailureSwitch,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store controlled by an existing switch.
    pub fn with_failure_switch(failure: FailureSwitch) -> Self {
        Self {
            entries: SettingsMap::new(),
            failure,
        }
    }

    /// Returns a handle to this store's failure switch.
    pub fn failure_switch(&self) -> FailureSwitch {
        self.failure.clone()
    }

    fn check(&self) -> StorageResult<()> {
        if self.failure.is_failing() {
            return Err(StorageError::Corruption("injected failure".to_string()));
        }
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, keys: &[String]) -> StorageResult<SettingsMap> {
        self.check()?;
        Ok(keys
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    fn get_all(&self) -> StorageResult<SettingsMap> {
        self.check()?;
        Ok(self.entries.clone())
    }

    fn set(&mut self, key: &str, value: &SettingValue) -> StorageResult<()> {
        self.check()?;
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&mut self, keys: &[String]) -> StorageResult<()> {
        self.check()?;
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.check()?;
        self.entries.clear();
        Ok(())
    }
}

/// Hands out [`MemoryStore`]s and keeps one failure switch per store.
///
/// Data does not outlive the store it was written to, so `known_owners`
/// only reports owners that were opened (or given a failure switch) through
/// this factory.
#[derive(Debug, Default)]
pub struct MemoryStoreFactory {
    switches: Mutex<HashMap<(DataCategory, OwnerId), FailureSwitch>>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the failure switch for `(category, owner)`, creating it if the
    /// store has not been opened yet.
    pub fn failure_switch(&self, category: &DataCategory, owner: &OwnerId) -> FailureSwitch {
        let mut switches = self.switches.lock().unwrap_or_else(PoisonError::into_inner);
        switches
            .entry((category.clone(), owner.clone()))
            .or_default()
            .clone()
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn open(
        &self,
        category: &DataCategory,
        owner: &OwnerId,
    ) -> StorageResult<Box<dyn SettingsStore>> {
        let switch = self.failure_switch(category, owner);
        Ok(Box::new(MemoryStore::with_failure_switch(switch)))
    }

    fn known_owners(&self, category: &DataCategory) -> StorageResult<Vec<OwnerId>> {
        let switches = self.switches.lock().unwrap_or_else(PoisonError::into_inner);
        let mut owners: Vec<OwnerId> = switches
            .keys()
            .filter(|(c, _)| c == category)
            .map(|(_, o)| o.clone())
            .collect();
        owners.sort();
        Ok(owners)
    }
}
