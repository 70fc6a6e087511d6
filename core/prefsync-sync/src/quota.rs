//! Write limits applied to locally originated settings.

use prefsync_storage::{SettingsMap, entry_size};
use prefsync_types::SettingValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits for the local settings API of one owner.
///
/// Only the outgoing path is checked; values arriving from the remote
/// service are always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaPolicy {
    /// Largest serialized `key + value`, in bytes.
    pub max_item_bytes: usize,
    /// Largest total of all entries of one owner, in bytes.
    pub max_total_bytes: usize,
    /// Most entries one owner may hold.
    pub max_items: usize,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_item_bytes: 8192,
            max_total_bytes: 102_400,
            max_items: 512,
        }
    }
}

impl QuotaPolicy {
    /// A policy that never rejects.
    pub fn unlimited() -> Self {
        Self {
            max_item_bytes: usize::MAX,
            max_total_bytes: usize::MAX,
            max_items: usize::MAX,
        }
    }

    /// Checks whether writing `key = value` into `current` stays within limits.
    pub fn check_set(
        &self,
        key: &str,
        value: &SettingValue,
        current: &SettingsMap,
    ) -> Result<(), QuotaViolation> {
        let size = entry_size(key, value);
        if size > self.max_item_bytes {
            return Err(QuotaViolation::ItemTooLarge {
                size,
                limit: self.max_item_bytes,
            });
        }

        let replaced = current.get(key).map(|old| entry_size(key, old));
        let total: usize = current.iter().map(|(k, v)| entry_size(k, v)).sum::<usize>()
            - replaced.unwrap_or(0)
            + size;
        if total > self.max_total_bytes {
            return Err(QuotaViolation::TotalBytes {
                total,
                limit: self.max_total_bytes,
            });
        }

        let items = current.len() + usize::from(replaced.is_none());
        if items > self.max_items {
            return Err(QuotaViolation::MaxItems {
                items,
                limit: self.max_items,
            });
        }
        Ok(())
    }
}

/// The limit a rejected write would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuotaViolation {
    #[error("item is {size} bytes, limit is {limit}")]
    ItemTooLarge { size: usize, limit: usize },

    #[error("owner would use {total} bytes, limit is {limit}")]
    TotalBytes { total: usize, limit: usize },

    #[error("owner would hold {items} items, limit is {limit}")]
    MaxItems { items: usize, limit: usize },
}
