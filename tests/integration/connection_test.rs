// These tests need a RabbitMQ broker reachable through TELEMETRY_MQ_CONNECTION_STRING
// (or the defaults) and are ignored by default.

use std::sync::Arc;
use std::time::Duration;

use telemetry_mq::persist::TraceRecord;
use telemetry_mq::transport::{BrokerChannel, BrokerConnection};
use telemetry_mq::{
    AmqpConnector, Binding, Connector, ExchangeType, MemoryStore, MessagingConfig, PersistHandler,
    Publisher, PublisherConfig, SeverityLevel, Subscriber, SubscriberConfig, TraceMessage,
};

use super::wait_until;

fn live_config() -> MessagingConfig {
    let mut config = MessagingConfig::default();
    config.apply_env_overrides().expect("invalid TELEMETRY_MQ_* variables");
    config
}

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_connection_establishes() {
    let config = live_config();
    let connector = AmqpConnector::new();

    let connection = connector
        .connect(&config.connection_params().unwrap())
        .await
        .expect("broker should accept the connection");
    let channel = connection.create_channel().await.unwrap();

    assert!(connection.is_open());
    assert!(channel.is_open());
    channel.close().await.unwrap();
    connection.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Ignore by default as it requires a running RabbitMQ instance
async fn test_trace_round_trip() {
    let config = live_config();
    let params = config.connection_params().unwrap();
    let connector: Arc<dyn Connector> = Arc::new(AmqpConnector::new());
    let exchange = format!("telemetry_mq_test_{}", uuid::Uuid::new_v4());
    let queue = format!("{}_traces", exchange);

    let store = Arc::new(MemoryStore::<TraceRecord>::new());
    let mut subscriber = Subscriber::<TraceMessage, _>::new(
        params.clone(),
        Arc::clone(&connector),
        SubscriberConfig::new(&queue).bind(Binding::new(&exchange, "traces", ExchangeType::Direct)),
        PersistHandler::<TraceMessage, _>::shared(Arc::clone(&store)),
    )
    .unwrap();
    subscriber.subscribe().await.unwrap();

    let publisher = Publisher::new(
        params,
        connector,
        PublisherConfig::new(&exchange, "traces")
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5)),
    )
    .unwrap();
    let mut trace = TraceMessage::new("boot", SeverityLevel::Information);
    publisher.publish(&mut trace).await.unwrap();

    wait_until(|| store.committed_len() == 1).await;
    assert_eq!(store.committed()[0].header.id, trace.header.id);

    publisher.close().await.unwrap();
    subscriber.unsubscribe().await.unwrap();
}
