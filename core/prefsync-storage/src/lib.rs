//! Local settings storage for prefsync.
//!
//! Every owner gets its own key/value store per data category. Stores are
//! opened through a [`StoreFactory`] and then owned exclusively by the sync
//! bridge that wraps them.
//!
//! # Implementations
//!
//! - [`SqliteStoreFactory`]: persistent stores sharing one SQLite database
//! - [`MemoryStoreFactory`]: ephemeral stores with failure injection, used by
//!   tests and by callers that do not need persistence

mod error;
mod memory;
mod sqlite;
mod store;

pub use error::{StorageError, StorageResult};
pub use memory::{FailureSwitch, MemoryStore, MemoryStoreFactory};
pub use sqlite::{SqliteStore, SqliteStoreFactory};
pub use store::{SettingsMap, SettingsStore, StoreFactory, entry_size};
