//! Settings sync engine for prefsync.
//!
//! Keeps per-owner local settings stores consistent with a remote sync
//! service, decides which backend mode sync runs in, and acquires the access
//! tokens the transport needs.
//!
//! # Architecture
//!
//! - **Bridge**: wraps one owner's store, turns local writes into change
//!   records and applies incoming ones
//! - **Coordinator**: one per data category, owns the bridges of its owners
//! - **Lifecycle**: the IDLE / BACKUP / ROLLBACK / SYNC state machine,
//!   run on a single task by [`LifecycleDriver`]
//! - **Auth**: token requests with exponential backoff, run by
//!   [`TokenService`]
//!
//! ## Startup
//!
//! 1. Spawn the [`TokenService`] and keep its event receiver
//! 2. Build a [`BackendLifecycleCoordinator`] on the token's credential
//!    receiver and spawn it with [`LifecycleDriver::spawn`]
//! 3. Request [`BackendMode::Sync`]; categories start as soon as a
//!    credential is published
//!
//! # Example
//!
//! ```
//! use prefsync_sync::{PrefsyncConfig, QuotaPolicy};
//!
//! let config = PrefsyncConfig::from_json_str(r#"{"quota": {"max_items": 64}}"#).unwrap();
//! assert_eq!(config.quota.max_items, 64);
//! assert_eq!(config.quota.max_item_bytes, QuotaPolicy::default().max_item_bytes);
//! ```

pub mod auth;
mod bridge;
mod config;
mod coordinator;
mod error;
pub mod lifecycle;
pub mod observer;
pub mod processor;
mod quota;

pub use auth::{
    AuthError, Backoff, BackoffPolicy, CredentialProvider, TokenAcquirer, TokenConfig, TokenEvent,
    TokenHandle, TokenOutcome, TokenRequest, TokenService,
};
pub use bridge::{BridgeState, SharedBridge, SyncBridge};
pub use config::PrefsyncConfig;
pub use coordinator::{DataCategoryCoordinator, DefaultErrorFactory, ErrorFactory, MergeOutcome};
pub use error::{SyncError, SyncResult};
pub use lifecycle::{
    BackendLifecycleCoordinator, BackendMode, LifecycleCommand, LifecycleConfig, LifecycleDriver,
    LifecycleError, LifecycleHandle, LifecycleResult, LifecycleStatus, ShutdownReason,
    TransitionOutcome, TransportFactory,
};
pub use observer::{ObserverList, SettingChange, SettingsChangedEvent, SettingsObserver};
pub use processor::{
    ChannelProcessor, ProcessorFactory, SharedProcessorFactory, SyncProcessor, TransportRequest,
};
pub use quota::{QuotaPolicy, QuotaViolation};
