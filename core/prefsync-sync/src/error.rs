//! Error types for the sync layer.

use crate::quota::QuotaViolation;
use prefsync_storage::StorageError;
use prefsync_types::{DataCategory, OwnerId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The remote transport refused or failed a call.
    #[error("transport error: {0}")]
    Transport(String),

    /// A local write was rejected by the quota policy.
    #[error("quota exceeded for {key}: {reason}")]
    QuotaExceeded { key: String, reason: QuotaViolation },

    /// `start_syncing` on a bridge or category that is already syncing.
    #[error("{owner} in {category} is already syncing")]
    AlreadySyncing {
        category: DataCategory,
        owner: OwnerId,
    },

    /// An operation that needs a syncing category was called on an idle one.
    #[error("{category} is not syncing")]
    NotSyncing { category: DataCategory },

    /// A call was routed to the coordinator of another category.
    #[error("category mismatch: expected {expected}, got {actual}")]
    CategoryMismatch {
        expected: DataCategory,
        actual: DataCategory,
    },

    /// Some owners of a category failed; the rest were processed.
    #[error("{} owner(s) failed in {category}", failures.len())]
    PartialFailure {
        category: DataCategory,
        failures: Vec<(OwnerId, String)>,
    },

    /// A category-level error produced by an [`ErrorFactory`](crate::ErrorFactory).
    #[error("{category}: {message}")]
    Category {
        category: DataCategory,
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}
