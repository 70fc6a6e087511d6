//! Change notifications for local settings.

use prefsync_types::{ChangeOrigin, DataCategory, OwnerId, SettingValue};
use std::sync::{Arc, PoisonError, RwLock};

/// One key's transition. `None` means absent.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub key: String,
    pub old_value: Option<SettingValue>,
    pub new_value: Option<SettingValue>,
}

impl SettingChange {
    pub fn new(
        key: impl Into<String>,
        old_value: Option<SettingValue>,
        new_value: Option<SettingValue>,
    ) -> Self {
        Self {
            key: key.into(),
            old_value,
            new_value,
        }
    }
}

/// Everything one mutation changed in one owner's store.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsChangedEvent {
    pub category: DataCategory,
    pub owner: OwnerId,
    pub origin: ChangeOrigin,
    pub changes: Vec<SettingChange>,
}

/// Receives settings change notifications.
pub trait SettingsObserver: Send + Sync {
    fn on_settings_changed(&self, event: &SettingsChangedEvent);
}

/// Observers registered for one or more categories.
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Arc<dyn SettingsObserver>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn SettingsObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Removes `observer` if it was registered.
    pub fn remove(&self, observer: &Arc<dyn SettingsObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every observer. Empty events are dropped.
    pub fn notify(&self, event: &SettingsChangedEvent) {
        if event.changes.is_empty() {
            return;
        }
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_settings_changed(event);
        }
    }
}

/// Collecting observers for tests.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every event it receives.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<SettingsChangedEvent>>,
    }

    impl RecordingObserver {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn events(&self) -> Vec<SettingsChangedEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn clear(&self) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl SettingsObserver for RecordingObserver {
        fn on_settings_changed(&self, event: &SettingsChangedEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        }
    }
}
