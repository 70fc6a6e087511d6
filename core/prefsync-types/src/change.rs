//! Change records exchanged with the remote synchronization service.
//!
//! A [`SyncChangeRecord`] describes one ADD, UPDATE or DELETE of a single
//! setting. Records are immutable once built; a list of them is a
//! [`ChangeBatch`].

use crate::{DataCategory, OwnerId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON-like setting value.
pub type SettingValue = serde_json::Value;

/// An ordered list of change records.
pub type ChangeBatch = Vec<SyncChangeRecord>;

/// The kind of change carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Where a mutation of the local store came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A call through the local settings API.
    Local,
    /// A record received from the remote service (merge or incoming batch).
    Remote,
}

/// One change to one setting of one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncChangeRecord {
    owner: OwnerId,
    key: String,
    value: SettingValue,
    change_type: ChangeType,
    category: DataCategory,
}

impl SyncChangeRecord {
    /// Creates a record of the given type.
    pub fn new(
        change_type: ChangeType,
        category: DataCategory,
        owner: OwnerId,
        key: impl Into<String>,
        value: SettingValue,
    ) -> Self {
        Self {
            owner,
            key: key.into(),
            value,
            change_type,
            category,
        }
    }

    /// Creates an ADD record.
    pub fn add(
        category: DataCategory,
        owner: OwnerId,
        key: impl Into<String>,
        value: SettingValue,
    ) -> Self {
        Self::new(ChangeType::Add, category, owner, key, value)
    }

    /// Creates an UPDATE record.
    pub fn update(
        category: DataCategory,
        owner: OwnerId,
        key: impl Into<String>,
        value: SettingValue,
    ) -> Self {
        Self::new(ChangeType::Update, category, owner, key, value)
    }

    /// Creates a DELETE record. Deletes carry a null value.
    pub fn delete(category: DataCategory, owner: OwnerId, key: impl Into<String>) -> Self {
        Self::new(ChangeType::Delete, category, owner, key, SettingValue::Null)
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &SettingValue {
        &self.value
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn category(&self) -> &DataCategory {
        &self.category
    }

    /// The remote tag of the setting, `owner/key`.
    ///
    /// Only the first `/` separates owner from key; dots are never split.
    pub fn tag(&self) -> String {
        format!("{}/{}", self.owner, self.key)
    }
}

impl fmt::Display for SyncChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.change_type, self.tag(), self.category)
    }
}

/// A setting as known to the remote service: `(owner, key, value)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingEntity {
    pub owner: OwnerId,
    pub key: String,
    pub value: SettingValue,
}

impl SettingEntity {
    pub fn new(owner: impl Into<OwnerId>, key: impl Into<String>, value: SettingValue) -> Self {
        Self {
            owner: owner.into(),
            key: key.into(),
            value,
        }
    }
}
