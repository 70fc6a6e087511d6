use prefsync_storage::MemoryStoreFactory;
use prefsync_sync::auth::mock::ScriptedProvider;
use prefsync_sync::lifecycle::mock::RecordingTransport;
use prefsync_sync::{
    AuthError, BackendLifecycleCoordinator, BackendMode, LifecycleConfig, LifecycleDriver,
    LifecycleError, LifecycleHandle, ShutdownReason, TokenConfig, TokenHandle, TokenService,
    TransitionOutcome,
};
use prefsync_types::{ChangeType, DataCategory, OwnerId, SyncChangeRecord};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const EXT: DataCategory = DataCategory::EXTENSION_SETTINGS;

struct Running {
    _dir: TempDir,
    transport: Arc<RecordingTransport>,
    provider: Arc<ScriptedProvider>,
    token: TokenHandle,
    handle: LifecycleHandle,
    task: tokio::task::JoinHandle<()>,
}

fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let (token, events) = TokenService::spawn(provider.clone(), TokenConfig::default());

    let transport = RecordingTransport::new();
    let coordinator = BackendLifecycleCoordinator::new(
        LifecycleConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        },
        Arc::new(MemoryStoreFactory::new()),
        transport.clone(),
        token.credentials(),
    )
    .with_token_handle(token.clone());
    let (handle, task) = LifecycleDriver::spawn(coordinator, Some(events));

    Running {
        _dir: dir,
        transport,
        provider,
        token,
        handle,
        task,
    }
}

/// Polls the driver until `check` holds or a second has passed.
async fn wait_for(handle: &LifecycleHandle, check: impl Fn(&prefsync_sync::LifecycleStatus) -> bool) {
    for _ in 0..100 {
        if check(&handle.status().await.unwrap()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", handle.status().await);
}

#[tokio::test]
async fn sync_starts_once_token_arrives() {
    let r = start();
    r.provider.push_token("tok-1");

    let outcome = r.handle.request_mode(BackendMode::Sync).await.unwrap();
    assert_eq!(outcome, TransitionOutcome::Entered(BackendMode::Sync));

    wait_for(&r.handle, |s| s.running.len() == 2).await;
    assert!(!r.handle.status().await.unwrap().awaiting_credential);
    assert_eq!(r.transport.created()[0].token.as_deref(), Some("tok-1"));
    assert_eq!(r.token.current().unwrap().token(), "tok-1");
}

#[tokio::test]
async fn permanent_auth_failure_is_visible_in_status() {
    let r = start();
    r.provider.push(Err(AuthError::AccountDisabled));

    r.handle.request_mode(BackendMode::Sync).await.unwrap();
    wait_for(&r.handle, |s| s.auth_error.is_some()).await;

    let status = r.handle.status().await.unwrap();
    assert_eq!(status.auth_error, Some(AuthError::AccountDisabled));
    assert!(status.awaiting_credential);
    assert!(status.running.is_empty());
}

#[tokio::test]
async fn local_writes_flow_through_handle() {
    let r = start();
    r.provider.push_token("tok");
    r.handle.request_mode(BackendMode::Sync).await.unwrap();
    wait_for(&r.handle, |s| s.running.len() == 2).await;

    let bridge = r.handle.storage(EXT, OwnerId::new("s1")).await.unwrap();
    bridge.lock().await.set("foo", json!("fooValue")).await.unwrap();

    let sync = r.transport.processor(BackendMode::Sync);
    assert_eq!(sync.get_only_change("s1", "foo").change_type(), ChangeType::Add);

    r.handle
        .process_incoming(
            EXT,
            vec![SyncChangeRecord::update(
                EXT,
                OwnerId::new("s1"),
                "foo",
                json!("barValue"),
            )],
        )
        .await
        .unwrap();
    assert_eq!(
        bridge.lock().await.get_all().unwrap()["foo"],
        json!("barValue")
    );
}

#[tokio::test]
async fn shutdown_releases_token() {
    let r = start();
    r.provider.push_token("tok");
    r.handle.request_mode(BackendMode::Sync).await.unwrap();
    wait_for(&r.handle, |s| s.running.len() == 2).await;

    r.handle.shutdown(ShutdownReason::StopSync).await.unwrap();
    assert_eq!(r.handle.status().await.unwrap().mode, BackendMode::Idle);
    assert!(r.token.current().is_none());
    assert_eq!(r.provider.invalidated(), vec!["tok".to_string()]);
}

#[tokio::test]
async fn restart_after_stop_waits_for_fresh_token() {
    let r = start();
    r.provider.push_token("tok-1");
    r.provider.push_token("tok-2");
    r.provider.set_invalidate_delay(Duration::from_millis(200));

    r.handle.request_mode(BackendMode::Sync).await.unwrap();
    wait_for(&r.handle, |s| s.running.len() == 2).await;

    r.handle.shutdown(ShutdownReason::StopSync).await.unwrap();
    assert!(r.token.current().is_none());
    assert_eq!(r.provider.invalidated(), vec!["tok-1".to_string()]);

    r.handle.request_mode(BackendMode::Sync).await.unwrap();
    wait_for(&r.handle, |s| s.running.len() == 2).await;

    let tokens: Vec<Option<String>> = r.transport.created().into_iter().map(|c| c.token).collect();
    assert_eq!(tokens, vec![Some("tok-1".to_string()), Some("tok-2".to_string())]);
    assert_eq!(r.token.current().unwrap().token(), "tok-2");
    assert!(!r.handle.status().await.unwrap().awaiting_credential);
}

#[tokio::test]
async fn auth_error_survives_restart_until_refreshed() {
    let r = start();
    r.provider.push(Err(AuthError::InvalidCredentials));
    r.provider.push_token("tok");

    r.handle.request_mode(BackendMode::Sync).await.unwrap();
    wait_for(&r.handle, |s| s.auth_error.is_some()).await;

    r.handle.shutdown(ShutdownReason::StopSync).await.unwrap();
    r.handle.request_mode(BackendMode::Sync).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = r.handle.status().await.unwrap();
    assert_eq!(status.auth_error, Some(AuthError::InvalidCredentials));
    assert!(status.awaiting_credential);
    assert_eq!(r.provider.acquire_calls(), 1);

    r.token.credentials_refreshed().unwrap();
    wait_for(&r.handle, |s| s.running.len() == 2).await;
    assert!(r.handle.status().await.unwrap().auth_error.is_none());
}

#[tokio::test]
async fn forbidden_transitions_are_reported_through_handle() {
    let r = start();
    r.handle.request_mode(BackendMode::Rollback).await.unwrap();

    let err = r.handle.request_mode(BackendMode::Sync).await.unwrap_err();
    assert!(matches!(err, LifecycleError::RollbackInProgress));

    r.handle.rollback_finished().await.unwrap();
    assert_eq!(r.handle.status().await.unwrap().mode, BackendMode::Idle);
}

#[tokio::test]
async fn unrecoverable_error_through_handle() {
    let r = start();
    r.handle
        .unrecoverable_error("disk full", false)
        .await
        .unwrap();

    let status = r.handle.status().await.unwrap();
    assert_eq!(status.unrecoverable_error.as_deref(), Some("disk full"));
    assert!(r.handle.request_mode(BackendMode::Backup).await.is_err());
}

#[tokio::test]
async fn backup_completion_through_handle() {
    let r = start();
    r.handle.request_mode(BackendMode::Backup).await.unwrap();
    assert_eq!(
        r.handle.backup_finished().await.unwrap(),
        TransitionOutcome::Unchanged
    );
    assert!(r.handle.status().await.unwrap().backup_finished);

    r.handle
        .remove_owner(EXT, OwnerId::new("nobody"))
        .await
        .unwrap();
}

#[tokio::test]
async fn driver_exits_when_handles_dropped() {
    let r = start();
    let Running { handle, task, .. } = r;
    let other = handle.clone();
    drop(handle);
    assert_eq!(other.status().await.unwrap().mode, BackendMode::Idle);
    drop(other);

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("driver did not stop")
        .unwrap();
}
