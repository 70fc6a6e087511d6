//! Aggregated configuration.

use crate::auth::TokenConfig;
use crate::error::SyncResult;
use crate::lifecycle::LifecycleConfig;
use crate::quota::QuotaPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every tunable of the sync engine. Missing fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefsyncConfig {
    pub quota: QuotaPolicy,
    pub token: TokenConfig,
    pub lifecycle: LifecycleConfig,
}

impl PrefsyncConfig {
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
