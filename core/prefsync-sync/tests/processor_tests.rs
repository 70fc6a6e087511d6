use prefsync_sync::processor::mock::RecordingProcessor;
use prefsync_sync::{
    ChannelProcessor, ProcessorFactory, SharedProcessorFactory, SyncError, SyncProcessor,
    TransportRequest,
};
use prefsync_types::{DataCategory, OwnerId, SettingEntity, SyncChangeRecord};
use serde_json::json;
use std::sync::Arc;

fn record(owner: &str, key: &str) -> SyncChangeRecord {
    SyncChangeRecord::add(
        DataCategory::EXTENSION_SETTINGS,
        OwnerId::new(owner),
        key,
        json!(1),
    )
}

// ── ChannelProcessor ─────────────────────────────────────────────

#[tokio::test]
async fn channel_processor_round_trips_through_transport_task() {
    let (processor, mut rx) = ChannelProcessor::new(8);

    let transport = tokio::spawn(async move {
        let mut sent = Vec::new();
        while let Some(request) = rx.recv().await {
            match request {
                TransportRequest::Send { batch, reply } => {
                    sent.extend(batch);
                    let _ = reply.send(Ok(()));
                }
                TransportRequest::FetchAll { category, reply } => {
                    let _ = reply.send(Ok(vec![SettingEntity::new(
                        "s1",
                        category.as_str(),
                        json!(true),
                    )]));
                }
            }
        }
        sent
    });

    processor.send(vec![record("s1", "a"), record("s1", "b")]).await.unwrap();
    let remote = processor
        .fetch_all(&DataCategory::APP_SETTINGS)
        .await
        .unwrap();
    assert_eq!(remote[0].key, "app-settings");

    drop(processor);
    let sent = transport.await.unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].key(), "b");
}

#[tokio::test]
async fn channel_processor_fails_when_transport_gone() {
    let (processor, rx) = ChannelProcessor::new(1);
    drop(rx);

    let err = processor.send(vec![record("s1", "a")]).await.unwrap_err();
    assert!(matches!(err, SyncError::ChannelClosed));
}

#[tokio::test]
async fn channel_processor_propagates_transport_errors() {
    let (processor, mut rx) = ChannelProcessor::new(1);
    tokio::spawn(async move {
        if let Some(TransportRequest::Send { reply, .. }) = rx.recv().await {
            let _ = reply.send(Err(SyncError::Transport("rejected".into())));
        }
    });

    let err = processor.send(vec![record("s1", "a")]).await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(msg) if msg == "rejected"));
}

// ── RecordingProcessor ───────────────────────────────────────────

#[tokio::test]
async fn recording_processor_fails_batches_touching_failing_owner() {
    let processor = RecordingProcessor::new();
    processor.fail_owner("bad");

    processor.send(vec![record("good", "a")]).await.unwrap();
    assert!(processor
        .send(vec![record("good", "b"), record("bad", "c")])
        .await
        .is_err());

    assert_eq!(processor.changes().len(), 1);
    assert_eq!(processor.send_count(), 2);
}

#[tokio::test]
async fn shared_factory_hands_out_same_processor() {
    let processor = RecordingProcessor::new();
    let factory = SharedProcessorFactory::new(processor.clone());

    factory
        .processor_for(&OwnerId::new("a"))
        .send(vec![record("a", "k")])
        .await
        .unwrap();
    factory
        .processor_for(&OwnerId::new("b"))
        .send(vec![record("b", "k")])
        .await
        .unwrap();

    assert_eq!(processor.changes().len(), 2);
    let _: Arc<dyn SyncProcessor> = factory.processor_for(&OwnerId::new("c"));
}
