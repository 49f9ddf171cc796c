use super::*;
use crate::test_utils::{FailingHandler, RecordingHandler};
use std::time::Duration;

#[tokio::test]
async fn test_publish_without_subscriber_is_buffered() {
    let channel = MemoryChannel::new();
    channel.publish("auth_queue", b"{\"a\":1}").await.unwrap();
    channel.publish("auth_queue", b"{\"a\":2}").await.unwrap();

    let (handler, mut rx) = RecordingHandler::new();
    channel
        .subscribe("auth_queue", Arc::new(handler))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(first.payload, b"{\"a\":1}");
    assert_eq!(second.payload, b"{\"a\":2}");
    assert_eq!(first.queue, "auth_queue");
}

#[tokio::test]
async fn test_queues_are_isolated() {
    let channel = MemoryChannel::new();
    let (handler, _rx) = RecordingHandler::new();
    let count = handler.count();
    channel.subscribe("authz_queue", Arc::new(handler)).await.unwrap();

    channel.publish("auth_queue", b"{}").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(channel.published_to("auth_queue").await.len(), 1);
    assert!(channel.published_to("authz_queue").await.is_empty());
}

#[tokio::test]
async fn test_failing_queue_rejects_publish() {
    let channel = MemoryChannel::new();
    channel.fail_queue("watch_history_queue").await;

    let err = channel
        .publish("watch_history_queue", b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Publish { ref queue, .. } if queue == "watch_history_queue"));
    assert_eq!(channel.published_count().await, 0);

    channel.restore_queue("watch_history_queue").await;
    channel.publish("watch_history_queue", b"{}").await.unwrap();
    assert_eq!(channel.published_count().await, 1);
}

#[tokio::test]
async fn test_second_subscriber_rejected() {
    let channel = MemoryChannel::new();
    let (first, _rx1) = RecordingHandler::new();
    let (second, _rx2) = RecordingHandler::new();

    channel.subscribe("user_data", Arc::new(first)).await.unwrap();
    let err = channel
        .subscribe("user_data", Arc::new(second))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Subscribe(_)));
}

#[tokio::test]
async fn test_handler_error_does_not_stop_consumer() {
    let channel = MemoryChannel::new();
    channel
        .subscribe("user_queue", Arc::new(FailingHandler { decode: true }))
        .await
        .unwrap();

    channel.publish("user_queue", b"not json").await.unwrap();
    channel.publish("user_queue", b"still not json").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(channel.published_count().await, 2);
}

#[tokio::test]
async fn test_shutdown_closes_channel() {
    let channel = MemoryChannel::new();
    channel.shutdown().await;

    assert!(matches!(
        channel.publish("auth_queue", b"{}").await,
        Err(BusError::Closed)
    ));
    let (handler, _rx) = RecordingHandler::new();
    assert!(matches!(
        channel.subscribe("auth_queue", Arc::new(handler)).await,
        Err(BusError::Closed)
    ));
}

#[tokio::test]
async fn test_publish_history_is_bounded() {
    let channel = MemoryChannel::new();
    for i in 0..PUBLISH_HISTORY_LIMIT + 5 {
        channel
            .publish("watch_history_queue", i.to_string().as_bytes())
            .await
            .unwrap();
    }

    assert_eq!(channel.published_count().await, PUBLISH_HISTORY_LIMIT);
    let kept = channel.published_to("watch_history_queue").await;
    assert_eq!(kept[0], b"5".to_vec());
    assert_eq!(
        kept.last().unwrap(),
        &(PUBLISH_HISTORY_LIMIT + 4).to_string().into_bytes()
    );
}
