//! Backend lifecycle: which mode sync runs in and when it may change.
//!
//! A profile's sync backend is in exactly one [`BackendMode`]. The
//! [`BackendLifecycleCoordinator`] owns the mode, applies the transition
//! rules and stands up one [`DataCategoryCoordinator`](crate::DataCategoryCoordinator)
//! per category the mode syncs. [`LifecycleDriver`] runs it on one task so
//! every lifecycle, category and batch operation is serialized.

mod coordinator;
mod driver;

pub use coordinator::{BackendLifecycleCoordinator, LifecycleStatus};
pub use driver::{LifecycleCommand, LifecycleDriver, LifecycleHandle};

use crate::error::{SyncError, SyncResult};
use crate::processor::SyncProcessor;
use prefsync_types::{Credential, DataCategory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Directory of the normal sync backend, under the data directory.
pub const SYNC_DATA_DIR: &str = "Sync Data";

/// Directory written by backup and read by rollback.
pub const BACKUP_DATA_DIR: &str = "Sync Data Backup";

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    Idle,
    /// Copies local data into the backup directory before sync starts.
    Backup,
    /// Restores local data from the backup directory.
    Rollback,
    Sync,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Backup => "BACKUP",
            Self::Rollback => "ROLLBACK",
            Self::Sync => "SYNC",
        };
        f.write_str(name)
    }
}

/// Why the backend is being shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// Sync was turned off; the mode's local sync data is wiped.
    DisableSync,
    /// Sync was stopped; local sync data is kept.
    StopSync,
    /// Leaving one mode to enter another. The credential is kept.
    SwitchMode,
    /// The process is going away; category coordinators are destroyed.
    ProcessExit,
}

/// Result of a successful [`BackendLifecycleCoordinator::request_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Already in the requested mode.
    Unchanged,
    Entered(BackendMode),
    /// Sync was requested but a backup must run first. Sync starts once
    /// the backup finishes.
    BackupFirst,
}

/// Lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Parent of the per-mode sync data directories.
    pub data_dir: PathBuf,
    /// Whether a backup pass must precede the first sync.
    pub need_backup: bool,
    /// Categories synced in [`BackendMode::Sync`]; more can be registered.
    pub sync_categories: Vec<DataCategory>,
    /// The reduced set handled by backup and rollback.
    pub backup_categories: Vec<DataCategory>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            need_backup: false,
            sync_categories: vec![DataCategory::EXTENSION_SETTINGS, DataCategory::APP_SETTINGS],
            backup_categories: vec![DataCategory::APP_SETTINGS],
        }
    }
}

impl LifecycleConfig {
    /// The sync data directory of `mode`. Idle maps to the sync directory.
    pub fn mode_dir(&self, mode: BackendMode) -> PathBuf {
        match mode {
            BackendMode::Backup | BackendMode::Rollback => self.data_dir.join(BACKUP_DATA_DIR),
            BackendMode::Sync | BackendMode::Idle => self.data_dir.join(SYNC_DATA_DIR),
        }
    }
}

/// Creates the processor a mode talks to.
///
/// Backup and rollback work against `data_dir` and get no credential; sync
/// is only started once a credential is available.
pub trait TransportFactory: Send + Sync {
    fn create_processor(
        &self,
        mode: BackendMode,
        credential: Option<&Credential>,
        data_dir: &Path,
    ) -> SyncResult<Arc<dyn SyncProcessor>>;
}

/// Errors that can occur in lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot switch from {from} to {to}")]
    Forbidden { from: BackendMode, to: BackendMode },

    #[error("backup in progress")]
    BackupInProgress,

    #[error("rollback in progress")]
    RollbackInProgress,

    /// The backend hit an unrecoverable error and was shut down.
    #[error("unrecoverable error: {0}")]
    Unrecoverable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The driver task is gone.
    #[error("lifecycle driver stopped")]
    DriverStopped,
}

/// A transport factory for testing.
pub mod mock {
    use super::*;
    use crate::processor::mock::RecordingProcessor;
    use std::collections::HashMap;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// One processor created by [`RecordingTransport`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CreatedProcessor {
        pub mode: BackendMode,
        pub token: Option<String>,
        pub data_dir: PathBuf,
    }

    #[derive(Default)]
    struct Inner {
        processors: HashMap<BackendMode, Arc<RecordingProcessor>>,
        created: Vec<CreatedProcessor>,
        failing: bool,
    }

    /// Hands out one [`RecordingProcessor`] per mode and records each call.
    #[derive(Default)]
    pub struct RecordingTransport {
        inner: Mutex<Inner>,
    }

    impl RecordingTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// The processor used for `mode`, created on first use.
        pub fn processor(&self, mode: BackendMode) -> Arc<RecordingProcessor> {
            self.lock()
                .processors
                .entry(mode)
                .or_insert_with(RecordingProcessor::new)
                .clone()
        }

        pub fn created(&self) -> Vec<CreatedProcessor> {
            self.lock().created.clone()
        }

        pub fn set_failing(&self, failing: bool) {
            self.lock().failing = failing;
        }
    }

    impl TransportFactory for RecordingTransport {
        fn create_processor(
            &self,
            mode: BackendMode,
            credential: Option<&Credential>,
            data_dir: &Path,
        ) -> SyncResult<Arc<dyn SyncProcessor>> {
            {
                let mut inner = self.lock();
                if inner.failing {
                    return Err(SyncError::Transport("injected failure".into()));
                }
                inner.created.push(CreatedProcessor {
                    mode,
                    token: credential.map(|c| c.token().to_string()),
                    data_dir: data_dir.to_path_buf(),
                });
            }
            Ok(self.processor(mode))
        }
    }
}
