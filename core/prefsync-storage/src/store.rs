//! The local store contract.

use crate::StorageResult;
use prefsync_types::{DataCategory, OwnerId, SettingValue};
use std::collections::BTreeMap;

/// Settings of one owner, keyed by setting name.
pub type SettingsMap = BTreeMap<String, SettingValue>;

/// A per-owner key/value store.
///
/// Reads take `&self`, writes take `&mut self`: the sync bridge that owns
/// the store is the only writer.
pub trait SettingsStore: Send {
    /// Returns the entries for `keys` that exist.
    fn get(&self, keys: &[String]) -> StorageResult<SettingsMap>;

    /// Returns every entry.
    fn get_all(&self) -> StorageResult<SettingsMap>;

    /// Inserts or replaces one entry.
    fn set(&mut self, key: &str, value: &SettingValue) -> StorageResult<()>;

    /// Removes the given keys. Missing keys are ignored.
    fn remove(&mut self, keys: &[String]) -> StorageResult<()>;

    /// Removes every entry.
    fn clear(&mut self) -> StorageResult<()>;

    /// Bytes used by `keys`, or by the whole store when `keys` is `None`.
    fn bytes_in_use(&self, keys: Option<&[String]>) -> StorageResult<usize> {
        let entries = match keys {
            Some(keys) => self.get(keys)?,
            None => self.get_all()?,
        };
        Ok(entries.iter().map(|(k, v)| entry_size(k, v)).sum())
    }
}

/// Opens stores for `(category, owner)` pairs.
pub trait StoreFactory: Send + Sync {
    /// Opens (creating if needed) the store of `owner` in `category`.
    fn open(
        &self,
        category: &DataCategory,
        owner: &OwnerId,
    ) -> StorageResult<Box<dyn SettingsStore>>;

    /// Owners that already have data in `category`.
    fn known_owners(&self, category: &DataCategory) -> StorageResult<Vec<OwnerId>>;
}

/// Size accounted for one entry: key bytes plus compact JSON bytes.
pub fn entry_size(key: &str, value: &SettingValue) -> usize {
    key.len() + value.to_string().len()
}
