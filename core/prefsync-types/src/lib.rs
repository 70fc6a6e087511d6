//! Core type definitions for prefsync.
//!
//! This crate defines the plain data shared by the storage and sync layers:
//! - Owner and data-category identifiers
//! - Setting values and the change records exchanged with the remote service
//! - Access credentials handed out by the credential provider
//!
//! Nothing here performs I/O.

mod change;
mod credential;
mod ids;

pub use change::{
    ChangeBatch, ChangeOrigin, ChangeType, SettingEntity, SettingValue, SyncChangeRecord,
};
pub use credential::Credential;
pub use ids::{DataCategory, OwnerId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identifier must not be empty")]
    EmptyIdentifier,
}
