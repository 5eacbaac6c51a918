// src/publisher.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::codec::{Codec, JsonCodec};
use crate::connection::{deadline, ConnectionManager, DEFAULT_CONNECT_TIMEOUT};
use crate::connection_string::ConnectionParams;
use crate::errors::{MessagingError, Result};
use crate::message::Envelope;
use crate::transport::{BrokerChannel, Connector, ExchangeType, OutboundProperties};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub routing_key: String,
    /// Declare the exchange (durable) before the first publish on each channel.
    pub declare_exchange: Option<ExchangeType>,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl PublisherConfig {
    pub fn new(exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            declare_exchange: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn declare_exchange(mut self, kind: ExchangeType) -> Self {
        self.declare_exchange = Some(kind);
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, publish: Duration) -> Self {
        self.connect_timeout = connect;
        self.publish_timeout = publish;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.exchange.is_empty() && self.routing_key.is_empty() {
            return Err(MessagingError::InvalidArgument(
                "exchange and routing key must not both be empty".to_string(),
            ));
        }
        if self.exchange.is_empty() && self.declare_exchange.is_some() {
            return Err(MessagingError::InvalidArgument(
                "the default exchange cannot be declared".to_string(),
            ));
        }
        Ok(())
    }
}

struct PublisherLink {
    manager: ConnectionManager,
    exchange_declared: bool,
}

impl PublisherLink {
    async fn channel(&mut self, config: &PublisherConfig) -> Result<Arc<dyn BrokerChannel>> {
        if !self.manager.is_open() {
            self.exchange_declared = false;
        }
        let channel = self.manager.get_channel().await?;

        if !self.exchange_declared {
            if let Some(kind) = config.declare_exchange {
                deadline(
                    "declaring exchange",
                    config.connect_timeout,
                    channel.declare_exchange(&config.exchange, kind),
                    MessagingError::TopologyError,
                )
                .await?;
                info!(exchange = %config.exchange, kind = kind.as_str(), "Exchange declared");
            }
            self.exchange_declared = true;
        }

        Ok(channel)
    }
}

/// Publishes envelopes to one exchange/routing key.
///
/// The connection and channel open on the first publish. Publishes from
/// concurrent tasks are serialised on the channel.
pub struct Publisher<C: Codec = JsonCodec> {
    config: PublisherConfig,
    codec: C,
    link: Mutex<PublisherLink>,
}

impl Publisher<JsonCodec> {
    pub fn new(
        params: ConnectionParams,
        connector: Arc<dyn Connector>,
        config: PublisherConfig,
    ) -> Result<Self> {
        Self::with_codec(params, connector, config, JsonCodec::new())
    }
}

impl<C: Codec> Publisher<C> {
    pub fn with_codec(
        params: ConnectionParams,
        connector: Arc<dyn Connector>,
        config: PublisherConfig,
        codec: C,
    ) -> Result<Self> {
        config.validate()?;
        let manager =
            ConnectionManager::new(params, connector).with_connect_timeout(config.connect_timeout);

        Ok(Publisher {
            config,
            codec,
            link: Mutex::new(PublisherLink {
                manager,
                exchange_declared: false,
            }),
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Stamps, serialises and sends `message`.
    ///
    /// A nil id is replaced with a fresh one, an empty operation id takes the
    /// id, and the timestamp is always overwritten. The stamped values are
    /// written back into `message`.
    pub async fn publish<M: Envelope>(&self, message: &mut M) -> Result<()> {
        let now = Utc::now();
        message.header_mut().stamp(now);
        let payload = self.codec.encode(message)?;

        let header = message.header();
        let properties = OutboundProperties {
            message_id: header.id.to_string(),
            correlation_id: header.operation_id.clone(),
            content_type: self.codec.content_type().to_string(),
            timestamp: now.timestamp().max(0) as u64,
            kind: M::KIND.as_str().to_string(),
        };

        let mut link = self.link.lock().await;
        let channel = link.channel(&self.config).await?;
        deadline(
            "publishing message",
            self.config.publish_timeout,
            channel.publish(
                &self.config.exchange,
                &self.config.routing_key,
                payload,
                properties,
            ),
            MessagingError::PublishError,
        )
        .await?;

        debug!(
            message_id = %header.id,
            operation_id = %header.operation_id,
            kind = M::KIND.as_str(),
            exchange = %self.config.exchange,
            routing_key = %self.config.routing_key,
            "Published message"
        );
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.manager.is_open()
    }

    /// Closes the channel and connection. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        link.exchange_declared = false;
        link.manager.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::message::{SeverityLevel, TraceMessage};
    use crate::transport::{BrokerConnection, ConsumerEvent, DeliveryStream, MemoryBroker};
    use futures::StreamExt;
    use uuid::Uuid;

    fn publisher(broker: &MemoryBroker, config: PublisherConfig) -> Publisher {
        Publisher::new(ConnectionParams::default(), Arc::new(broker.clone()), config).unwrap()
    }

    async fn consume(
        broker: &MemoryBroker,
        queue: &str,
    ) -> (Box<dyn BrokerConnection>, DeliveryStream) {
        let connection = broker.connect(&ConnectionParams::default()).await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        let stream = channel.consume(queue, "probe", false).await.unwrap();
        (connection, stream)
    }

    async fn next_trace(stream: &mut DeliveryStream) -> TraceMessage {
        match stream.next().await {
            Some(ConsumerEvent::Delivery(message)) => {
                JsonCodec::new().decode(&message.payload).unwrap()
            }
            other => panic!("expected a delivery, got {:?}", other),
        }
    }

    fn traces_topology(broker: &MemoryBroker) {
        broker.declare_exchange("diagnostics", ExchangeType::Direct).unwrap();
        broker.declare_queue("traces").unwrap();
        broker.bind("traces", "diagnostics", "traces").unwrap();
    }

    #[tokio::test]
    async fn publish_stamps_identity_and_time() {
        let broker = MemoryBroker::new();
        traces_topology(&broker);
        let publisher = publisher(&broker, PublisherConfig::new("diagnostics", "traces"));

        let mut trace = TraceMessage::new("boot", SeverityLevel::Information);
        let before = Utc::now();
        publisher.publish(&mut trace).await.unwrap();
        let after = Utc::now();

        assert!(!trace.header.id.is_nil());
        assert_eq!(trace.header.operation_id, trace.header.id.to_string());
        let stamped = trace.timestamp().unwrap();
        assert!(stamped >= before && stamped <= after);
    }

    #[tokio::test]
    async fn caller_identity_is_preserved_and_sent() {
        let broker = MemoryBroker::new();
        traces_topology(&broker);
        let (_probe, mut stream) = consume(&broker, "traces").await;
        let publisher = publisher(&broker, PublisherConfig::new("diagnostics", "traces"));

        let id = Uuid::new_v4();
        let mut trace = TraceMessage::new("checkout", SeverityLevel::Warning);
        trace.header = trace.header.clone().with_id(id).with_operation_id("order-17");
        publisher.publish(&mut trace).await.unwrap();

        let received = next_trace(&mut stream).await;
        assert_eq!(received.header.id, id);
        assert_eq!(received.operation_id(), "order-17");
        assert_eq!(received.message, "checkout");
        assert_eq!(received.timestamp(), trace.timestamp());
    }

    #[tokio::test]
    async fn republishing_keeps_identity_but_restamps_time() {
        let broker = MemoryBroker::new();
        traces_topology(&broker);
        let publisher = publisher(&broker, PublisherConfig::new("diagnostics", "traces"));

        let mut trace = TraceMessage::new("retry", SeverityLevel::Verbose);
        publisher.publish(&mut trace).await.unwrap();
        let first = trace.header.clone();
        tokio::time::sleep(Duration::from_millis(5)).await;
        publisher.publish(&mut trace).await.unwrap();

        assert_eq!(trace.header.id, first.id);
        assert_eq!(trace.header.operation_id, first.operation_id);
        assert!(trace.timestamp() > first.timestamp());
    }

    #[tokio::test]
    async fn connection_opens_once_across_publishes() {
        let broker = MemoryBroker::new();
        traces_topology(&broker);
        let publisher = publisher(&broker, PublisherConfig::new("diagnostics", "traces"));
        assert!(!publisher.is_connected().await);

        for n in 0..3 {
            let mut trace = TraceMessage::new(format!("tick {}", n), SeverityLevel::Verbose);
            publisher.publish(&mut trace).await.unwrap();
        }

        assert!(publisher.is_connected().await);
        assert_eq!(broker.stats().connections_opened, 1);
        assert_eq!(broker.queue_depth("traces"), 3);
    }

    #[tokio::test]
    async fn concurrent_publishes_all_arrive_once() {
        let broker = MemoryBroker::new();
        traces_topology(&broker);
        let publisher = Arc::new(publisher(&broker, PublisherConfig::new("diagnostics", "traces")));

        let tasks: Vec<_> = (0..20)
            .map(|n| {
                let publisher = Arc::clone(&publisher);
                tokio::spawn(async move {
                    let mut trace =
                        TraceMessage::new(format!("event {}", n), SeverityLevel::Information);
                    publisher.publish(&mut trace).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let (_probe, mut stream) = consume(&broker, "traces").await;
        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(next_trace(&mut stream).await.message);
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 20);
        assert_eq!(broker.stats().connections_opened, 2);
    }

    #[tokio::test]
    async fn declares_the_exchange_when_asked() {
        let broker = MemoryBroker::new();
        let config = PublisherConfig::new("audit", "events").declare_exchange(ExchangeType::Topic);
        let publisher = publisher(&broker, config);

        let mut trace = TraceMessage::new("declared", SeverityLevel::Information);
        publisher.publish(&mut trace).await.unwrap();

        // The exchange now exists with the declared type.
        assert!(broker.declare_exchange("audit", ExchangeType::Topic).is_ok());
        assert!(broker.declare_exchange("audit", ExchangeType::Direct).is_err());
    }

    #[tokio::test]
    async fn unknown_exchange_fails_loudly() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker, PublisherConfig::new("missing", "traces"));

        let mut trace = TraceMessage::new("lost", SeverityLevel::Information);
        let err = publisher.publish(&mut trace).await.unwrap_err();

        assert!(matches!(err, MessagingError::PublishError(_)));
    }

    #[tokio::test]
    async fn disconnected_broker_fails_immediately() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let publisher = publisher(&broker, PublisherConfig::new("", "traces"));

        let mut trace = TraceMessage::new("offline", SeverityLevel::Error);
        let err = publisher.publish(&mut trace).await.unwrap_err();

        assert!(matches!(err, MessagingError::ConnectionError(_)));
        // Stamping happens before any I/O.
        assert!(trace.header.is_stamped());
    }

    #[tokio::test]
    async fn recovers_after_connection_loss() {
        let broker = MemoryBroker::new();
        broker.declare_queue("traces").unwrap();
        let publisher = publisher(&broker, PublisherConfig::new("", "traces"));

        publisher.publish(&mut TraceMessage::new("one", SeverityLevel::Information)).await.unwrap();
        broker.drop_connections();
        publisher.publish(&mut TraceMessage::new("two", SeverityLevel::Information)).await.unwrap();

        assert_eq!(broker.stats().connections_opened, 2);
        assert_eq!(broker.queue_depth("traces"), 2);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let broker = MemoryBroker::new();
        broker.declare_queue("traces").unwrap();
        let publisher = publisher(&broker, PublisherConfig::new("", "traces"));
        publisher.publish(&mut TraceMessage::new("bye", SeverityLevel::Information)).await.unwrap();

        publisher.close().await.unwrap();
        publisher.close().await.unwrap();

        assert_eq!(broker.stats().connections_closed, 1);
        assert!(!publisher.is_connected().await);
    }

    #[test]
    fn rejects_empty_addressing() {
        let broker = MemoryBroker::new();
        let result = Publisher::new(
            ConnectionParams::default(),
            Arc::new(broker),
            PublisherConfig::new("", ""),
        );
        assert!(matches!(result, Err(MessagingError::InvalidArgument(_))));

        let result = Publisher::new(
            ConnectionParams::default(),
            Arc::new(MemoryBroker::new()),
            PublisherConfig::new("", "traces").declare_exchange(ExchangeType::Direct),
        );
        assert!(matches!(result, Err(MessagingError::InvalidArgument(_))));
    }
}
