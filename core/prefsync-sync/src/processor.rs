//! The outbound side of a sync bridge.
//!
//! A [`SyncProcessor`] carries change batches to the remote service and, at
//! merge time, supplies the remote view of a category. Implementations:
//!
//! - [`ChannelProcessor`]: hands every call to a transport task over an mpsc
//!   queue and waits for its reply
//! - [`mock::RecordingProcessor`]: records batches, serves a canned remote
//!   view and injects failures

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use prefsync_types::{ChangeBatch, DataCategory, OwnerId, SettingEntity};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Forwards local changes to the remote service.
#[async_trait]
pub trait SyncProcessor: Send + Sync {
    /// Delivers one batch. Records keep their order.
    async fn send(&self, batch: ChangeBatch) -> SyncResult<()>;

    /// Returns every remote entity of `category`.
    async fn fetch_all(&self, category: &DataCategory) -> SyncResult<Vec<SettingEntity>>;
}

/// Hands out the processor each owner's bridge should use.
pub trait ProcessorFactory: Send + Sync {
    fn processor_for(&self, owner: &OwnerId) -> Arc<dyn SyncProcessor>;
}

/// A factory that gives every owner the same processor.
pub struct SharedProcessorFactory {
    processor: Arc<dyn SyncProcessor>,
}

impl SharedProcessorFactory {
    pub fn new(processor: Arc<dyn SyncProcessor>) -> Self {
        Self { processor }
    }
}

impl ProcessorFactory for SharedProcessorFactory {
    fn processor_for(&self, _owner: &OwnerId) -> Arc<dyn SyncProcessor> {
        self.processor.clone()
    }
}

/// A call waiting for the transport task.
#[derive(Debug)]
pub enum TransportRequest {
    Send {
        batch: ChangeBatch,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    FetchAll {
        category: DataCategory,
        reply: oneshot::Sender<SyncResult<Vec<SettingEntity>>>,
    },
}

/// A processor backed by an mpsc queue.
///
/// If the receiving task goes away every call fails with
/// [`SyncError::ChannelClosed`].
#[derive(Clone)]
pub struct ChannelProcessor {
    tx: mpsc::Sender<TransportRequest>,
}

impl ChannelProcessor {
    /// Creates the processor and the receiver the transport task consumes.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<TransportRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<SyncResult<T>>) -> TransportRequest,
    ) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)?
    }
}

#[async_trait]
impl SyncProcessor for ChannelProcessor {
    async fn send(&self, batch: ChangeBatch) -> SyncResult<()> {
        self.call(|reply| TransportRequest::Send { batch, reply })
            .await
    }

    async fn fetch_all(&self, category: &DataCategory) -> SyncResult<Vec<SettingEntity>> {
        let category = category.clone();
        self.call(|reply| TransportRequest::FetchAll { category, reply })
            .await
    }
}

/// A mock processor for testing.
pub mod mock {
    use super::*;
    use prefsync_types::SyncChangeRecord;
    use std::collections::HashSet;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    #[derive(Default)]
    struct Inner {
        changes: Vec<SyncChangeRecord>,
        remote: Vec<SettingEntity>,
        fail_all: bool,
        failing_owners: HashSet<OwnerId>,
        send_count: usize,
    }

    /// Records every batch it is given.
    ///
    /// A batch fails as a whole if failure is switched on globally or if it
    /// touches a failing owner. Failed batches are not recorded.
    #[derive(Default)]
    pub struct RecordingProcessor {
        inner: Mutex<Inner>,
    }

    impl RecordingProcessor {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// All records delivered so far, in order.
        pub fn changes(&self) -> Vec<SyncChangeRecord> {
            self.lock().changes.clone()
        }

        pub fn clear_changes(&self) {
            self.lock().changes.clear();
        }

        /// Returns the only record for `owner/key`.
        ///
        /// # Panics
        ///
        /// Panics unless exactly one such record was delivered.
        pub fn get_only_change(&self, owner: &str, key: &str) -> SyncChangeRecord {
            let mut matching: Vec<_> = self
                .lock()
                .changes
                .iter()
                .filter(|c| c.owner().as_str() == owner && c.key() == key)
                .cloned()
                .collect();
            assert_eq!(
                matching.len(),
                1,
                "expected exactly one change for {owner}/{key}, got {matching:?}"
            );
            matching.swap_remove(0)
        }

        pub fn set_fail_all(&self, fail: bool) {
            self.lock().fail_all = fail;
        }

        pub fn fail_owner(&self, owner: impl Into<OwnerId>) {
            self.lock().failing_owners.insert(owner.into());
        }

        /// Sets what `fetch_all` returns.
        pub fn set_remote(&self, entities: Vec<SettingEntity>) {
            self.lock().remote = entities;
        }

        /// Number of `send` calls, failed ones included.
        pub fn send_count(&self) -> usize {
            self.lock().send_count
        }
    }

    #[async_trait]
    impl SyncProcessor for RecordingProcessor {
        async fn send(&self, batch: ChangeBatch) -> SyncResult<()> {
            let mut inner = self.lock();
            inner.send_count += 1;
            if inner.fail_all {
                return Err(SyncError::Transport("injected failure".into()));
            }
            if let Some(record) = batch
                .iter()
                .find(|r| inner.failing_owners.contains(r.owner()))
            {
                return Err(SyncError::Transport(format!(
                    "injected failure for {}",
                    record.owner()
                )));
            }
            inner.changes.extend(batch);
            Ok(())
        }

        async fn fetch_all(&self, _category: &DataCategory) -> SyncResult<Vec<SettingEntity>> {
            let inner = self.lock();
            if inner.fail_all {
                return Err(SyncError::Transport("injected failure".into()));
            }
            Ok(inner.remote.clone())
        }
    }
}
