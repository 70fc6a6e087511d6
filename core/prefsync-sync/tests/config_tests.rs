use pretty_assertions::assert_eq;
use prefsync_sync::{PrefsyncConfig, QuotaPolicy, SyncError};
use prefsync_types::DataCategory;
use std::path::PathBuf;

#[test]
fn empty_object_yields_defaults() {
    let config = PrefsyncConfig::from_json_str("{}").unwrap();
    assert_eq!(config, PrefsyncConfig::default());
    assert_eq!(config.quota, QuotaPolicy::default());
    assert_eq!(config.token.scopes, vec!["prefsync".to_string()]);
    assert_eq!(config.token.backoff.initial_delay_ms, 2_000);
    assert_eq!(
        config.lifecycle.sync_categories,
        vec![DataCategory::EXTENSION_SETTINGS, DataCategory::APP_SETTINGS]
    );
    assert_eq!(
        config.lifecycle.backup_categories,
        vec![DataCategory::APP_SETTINGS]
    );
}

#[test]
fn partial_sections_keep_remaining_defaults() {
    let json = r#"{
        "quota": { "max_items": 16 },
        "token": { "backoff": { "jitter": 0.0 } },
        "lifecycle": { "data_dir": "/var/lib/prefsync", "need_backup": true }
    }"#;
    let config = PrefsyncConfig::from_json_str(json).unwrap();

    assert_eq!(config.quota.max_items, 16);
    assert_eq!(config.quota.max_item_bytes, QuotaPolicy::default().max_item_bytes);
    assert_eq!(config.token.backoff.jitter, 0.0);
    assert_eq!(config.token.backoff.multiplier, 2.0);
    assert_eq!(config.lifecycle.data_dir, PathBuf::from("/var/lib/prefsync"));
    assert!(config.lifecycle.need_backup);
}

#[test]
fn custom_categories() {
    let json = r#"{ "lifecycle": { "sync_categories": ["themes"] } }"#;
    let config = PrefsyncConfig::from_json_str(json).unwrap();
    assert_eq!(
        config.lifecycle.sync_categories,
        vec![DataCategory::new("themes")]
    );
}

#[test]
fn malformed_json_is_rejected() {
    let err = PrefsyncConfig::from_json_str("{ quota: ").unwrap_err();
    assert!(matches!(err, SyncError::Serialization(_)));
}

#[test]
fn reads_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefsync.json");
    std::fs::write(&path, r#"{ "quota": { "max_total_bytes": 1024 } }"#).unwrap();

    let config = PrefsyncConfig::from_json_file(&path).unwrap();
    assert_eq!(config.quota.max_total_bytes, 1024);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PrefsyncConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, SyncError::Io(_)));
}
