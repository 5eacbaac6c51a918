use std::sync::Arc;

use telemetry_mq::persist::{ErrorRecord, StoreCalls, TraceRecord};
use telemetry_mq::{
    Binding, Connector, Envelope, ErrorMessage, ExchangeType, MemoryBroker, MemoryStore,
    MessagingError, PersistHandler, Publisher, PublisherConfig, SeverityLevel, Subscriber,
    SubscriberConfig, SubscriptionState, TraceMessage,
};

use super::{params, wait_until};

fn traces_subscriber(
    connector: &Arc<dyn Connector>,
    store: &Arc<MemoryStore<TraceRecord>>,
) -> Subscriber<TraceMessage, PersistHandler<TraceMessage, MemoryStore<TraceRecord>>> {
    let config = SubscriberConfig::new("traces")
        .bind(Binding::new("diagnostics", "traces", ExchangeType::Direct));
    Subscriber::new(
        params(),
        Arc::clone(connector),
        config,
        PersistHandler::shared(Arc::clone(store)),
    )
    .unwrap()
}

fn traces_publisher(connector: &Arc<dyn Connector>) -> Publisher {
    Publisher::new(
        params(),
        Arc::clone(connector),
        PublisherConfig::new("diagnostics", "traces"),
    )
    .unwrap()
}

#[tokio::test]
async fn boot_trace_is_stamped_delivered_and_stored() {
    let broker = MemoryBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let store = Arc::new(MemoryStore::new());

    let mut subscriber = traces_subscriber(&connector, &store);
    subscriber.subscribe().await.unwrap();
    let publisher = traces_publisher(&connector);

    let mut trace = TraceMessage::new("boot", SeverityLevel::Information);
    assert!(trace.id().is_nil());
    publisher.publish(&mut trace).await.unwrap();

    wait_until(|| store.committed_len() == 1).await;
    let stored = &store.committed()[0];

    assert_eq!(stored.message, "boot");
    assert!(!stored.header.id.is_nil());
    assert_eq!(stored.header.id, trace.id());
    assert_eq!(stored.header.operation_id, stored.header.id.to_string());
    assert_eq!(Some(stored.header.timestamp), trace.timestamp());
    assert_eq!(store.calls(), StoreCalls { inserts: 1, commits: 1, rollbacks: 0 });

    let delivery = subscriber.metrics();
    assert_eq!((delivery.received, delivery.decode_failures), (1, 0));
    wait_until(|| subscriber.metrics().handled == 1).await;
}

#[tokio::test]
async fn store_outage_is_absorbed_and_consumption_continues() {
    let broker = MemoryBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let store = Arc::new(MemoryStore::new());

    let mut subscriber = traces_subscriber(&connector, &store);
    subscriber.subscribe().await.unwrap();
    let publisher = traces_publisher(&connector);

    store.fail_commits(true);
    publisher
        .publish(&mut TraceMessage::new("during outage", SeverityLevel::Warning))
        .await
        .unwrap();
    wait_until(|| subscriber.handler().metrics().dropped == 1).await;

    store.fail_commits(false);
    publisher
        .publish(&mut TraceMessage::new("after outage", SeverityLevel::Information))
        .await
        .unwrap();
    wait_until(|| store.committed_len() == 1).await;

    assert_eq!(store.committed()[0].message, "after outage");
    assert_eq!(store.calls().rollbacks, 1);
    // The handler never failed from the subscriber's point of view.
    wait_until(|| subscriber.metrics().handled == 2).await;
    assert_eq!(subscriber.metrics().handler_failures, 0);
    assert!(subscriber.is_subscribed());
}

#[tokio::test]
async fn malformed_delivery_is_dropped_between_good_ones() {
    let broker = MemoryBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let store = Arc::new(MemoryStore::new());

    let mut subscriber = traces_subscriber(&connector, &store);
    subscriber.subscribe().await.unwrap();
    let publisher = traces_publisher(&connector);

    publisher.publish(&mut TraceMessage::new("first", SeverityLevel::Information)).await.unwrap();
    broker.inject("diagnostics", "traces", r#"{"message": 42}"#).unwrap();
    publisher.publish(&mut TraceMessage::new("second", SeverityLevel::Information)).await.unwrap();

    wait_until(|| store.committed_len() == 2).await;
    let metrics = subscriber.metrics();
    assert_eq!(metrics.received, 3);
    assert_eq!(metrics.decode_failures, 1);
}

#[tokio::test]
async fn topic_routing_separates_kinds() {
    let broker = MemoryBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let traces = Arc::new(MemoryStore::<TraceRecord>::new());
    let errors = Arc::new(MemoryStore::<ErrorRecord>::new());

    let mut trace_subscriber = Subscriber::<TraceMessage, _>::new(
        params(),
        Arc::clone(&connector),
        SubscriberConfig::new("trace-store")
            .bind(Binding::new("telemetry", "telemetry.trace", ExchangeType::Topic)),
        PersistHandler::<TraceMessage, _>::shared(Arc::clone(&traces)),
    )
    .unwrap();
    let mut error_subscriber = Subscriber::<ErrorMessage, _>::new(
        params(),
        Arc::clone(&connector),
        SubscriberConfig::new("error-store")
            .bind(Binding::new("telemetry", "telemetry.error", ExchangeType::Topic)),
        PersistHandler::<ErrorMessage, _>::shared(Arc::clone(&errors)),
    )
    .unwrap();
    trace_subscriber.subscribe().await.unwrap();
    error_subscriber.subscribe().await.unwrap();

    let trace_publisher = Publisher::new(
        params(),
        Arc::clone(&connector),
        PublisherConfig::new("telemetry", "telemetry.trace"),
    )
    .unwrap();
    let error_publisher = Publisher::new(
        params(),
        Arc::clone(&connector),
        PublisherConfig::new("telemetry", "telemetry.error"),
    )
    .unwrap();

    trace_publisher
        .publish(&mut TraceMessage::new("cache warmed", SeverityLevel::Verbose))
        .await
        .unwrap();
    let failure = MessagingError::InvalidArgument("queue name must not be empty".to_string());
    error_publisher.publish(&mut ErrorMessage::from_error(&failure)).await.unwrap();

    wait_until(|| traces.committed_len() == 1 && errors.committed_len() == 1).await;
    assert_eq!(traces.committed()[0].message, "cache warmed");
    let stored_error = &errors.committed()[0];
    assert_eq!(stored_error.exception_type, "MessagingError");
    assert_eq!(stored_error.stack_trace, "");
    assert_eq!(stored_error.severity_level, "Error");
}

#[tokio::test]
async fn lifecycle_is_idempotent_end_to_end() {
    let broker = MemoryBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let store = Arc::new(MemoryStore::new());

    let mut subscriber = traces_subscriber(&connector, &store);
    subscriber.subscribe().await.unwrap();
    subscriber.subscribe().await.unwrap();
    assert_eq!(broker.stats().connections_opened, 1);

    subscriber.unsubscribe().await.unwrap();
    subscriber.unsubscribe().await.unwrap();
    assert_eq!(subscriber.state(), SubscriptionState::Unsubscribed);

    let stats = broker.stats();
    assert_eq!(stats.connections_closed, 1);
    assert_eq!(stats.channels_closed, 1);

    // Messages published while nobody consumes wait in the durable queue.
    let publisher = traces_publisher(&connector);
    publisher.publish(&mut TraceMessage::new("queued", SeverityLevel::Information)).await.unwrap();
    assert_eq!(broker.queue_depth("traces"), 1);

    subscriber.subscribe().await.unwrap();
    wait_until(|| store.committed_len() == 1).await;
    assert_eq!(store.committed()[0].message, "queued");
}

#[tokio::test]
async fn many_tasks_share_one_publisher() {
    let broker = MemoryBroker::new();
    let connector: Arc<dyn Connector> = Arc::new(broker.clone());
    let store = Arc::new(MemoryStore::new());

    let mut subscriber = traces_subscriber(&connector, &store);
    subscriber.subscribe().await.unwrap();
    let publisher = Arc::new(traces_publisher(&connector));

    let tasks: Vec<_> = (0..32)
        .map(|n| {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move {
                let mut trace =
                    TraceMessage::new(format!("request {}", n), SeverityLevel::Information);
                publisher.publish(&mut trace).await.map(|()| trace.id())
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }

    wait_until(|| store.committed_len() == 32).await;
    let mut stored: Vec<_> = store.committed().into_iter().map(|record| record.header.id).collect();
    stored.sort();
    ids.sort();
    assert_eq!(stored, ids);
}
