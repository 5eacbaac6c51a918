use std::sync::Arc;

use telemetry_mq::persist::MetricRecord;
use telemetry_mq::{
    handler_fn, Envelope, InProcessPublisher, MemoryStore, MetricMessage, PersistHandler,
    SharedHandler,
};

#[tokio::test]
async fn in_process_fanout_feeds_a_persist_handler() {
    let publisher = InProcessPublisher::<MetricMessage>::new();
    let store = Arc::new(MemoryStore::<MetricRecord>::new());
    let persist: SharedHandler<MetricMessage> =
        Arc::new(PersistHandler::<MetricMessage, _>::shared(Arc::clone(&store)));
    let failing: SharedHandler<MetricMessage> =
        Arc::new(handler_fn(|_: MetricMessage| async {
            Err::<(), _>(anyhow::anyhow!("sink offline"))
        }));

    publisher.subscribe(Arc::clone(&failing));
    assert!(publisher.subscribe_once(Arc::clone(&persist)));
    assert!(!publisher.subscribe_once(Arc::clone(&persist)));

    let metric = MetricMessage::aggregate("request.latency", &[12.0, 8.0, 30.0]);
    let report = publisher.publish(metric.clone()).join().await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    let stored = &store.committed()[0];
    assert_eq!(stored.name, "request.latency");
    assert_eq!(stored.count, 3);
    assert_eq!(stored.min, 8.0);
    // Nothing stamps messages on the in-process path.
    assert!(metric.timestamp().is_none());
    assert!(stored.header.id.is_nil());
}

#[tokio::test]
async fn unsubscribed_handler_stops_receiving() {
    let publisher = InProcessPublisher::<MetricMessage>::new();
    let store = Arc::new(MemoryStore::<MetricRecord>::new());
    let persist: SharedHandler<MetricMessage> =
        Arc::new(PersistHandler::<MetricMessage, _>::shared(Arc::clone(&store)));

    publisher.subscribe(Arc::clone(&persist));
    publisher.publish(MetricMessage::new("cpu", 0.4)).join().await;
    assert!(publisher.unsubscribe(&persist));
    publisher.publish(MetricMessage::new("cpu", 0.9)).join().await;

    assert_eq!(store.committed_len(), 1);
    assert_eq!(publisher.subscriber_count(), 0);
}
