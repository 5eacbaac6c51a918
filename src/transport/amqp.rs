// src/transport/amqp.rs
// RabbitMQ backend over lapin.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info};

use super::{
    BrokerChannel, BrokerConnection, Connector, ConsumerEvent, DeliveryStream, ExchangeType,
    InboundMessage, OutboundProperties, TransportResult,
};
use crate::connection_string::ConnectionParams;

const REPLY_SUCCESS: u16 = 200;
const PERSISTENT: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> TransportResult<Box<dyn BrokerConnection>> {
        info!("Attempting to connect to RabbitMQ at {}", params);
        let connection =
            Connection::connect_uri(params.to_amqp_uri(), ConnectionProperties::default()).await?;
        info!("Successfully connected to RabbitMQ");

        Ok(Box::new(AmqpConnection { connection }))
    }
}

pub struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> TransportResult<Arc<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        debug!(channel_id = channel.id(), "Channel created");
        Ok(Arc::new(AmqpChannel { channel }))
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn close(&self) -> TransportResult<()> {
        self.connection.close(REPLY_SUCCESS, "Closing connection").await?;
        Ok(())
    }
}

pub struct AmqpChannel {
    channel: Channel,
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Direct => ExchangeKind::Direct,
        ExchangeType::Fanout => ExchangeKind::Fanout,
        ExchangeType::Topic => ExchangeKind::Topic,
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeType) -> TransportResult<()> {
        self.channel
            .exchange_declare(
                name,
                exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> TransportResult<()> {
        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        debug!(queue = name, messages = queue.message_count(), "Queue declared");
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> TransportResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: OutboundProperties,
    ) -> TransportResult<()> {
        let properties = BasicProperties::default()
            .with_message_id(properties.message_id.into())
            .with_correlation_id(properties.correlation_id.into())
            .with_content_type(properties.content_type.into())
            .with_timestamp(properties.timestamp)
            .with_kind(properties.kind.into())
            .with_delivery_mode(PERSISTENT);

        // The returned PublisherConfirm is dropped: confirms are not awaited.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        exclusive: bool,
    ) -> TransportResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        let stream = consumer
            .map(|delivery| match delivery {
                Ok(delivery) => ConsumerEvent::Delivery(InboundMessage {
                    payload: delivery.data,
                    exchange: delivery.exchange.as_str().to_string(),
                    routing_key: delivery.routing_key.as_str().to_string(),
                    delivery_tag: delivery.delivery_tag,
                    redelivered: delivery.redelivered,
                }),
                Err(err) => ConsumerEvent::ChannelShutdown(err.to_string()),
            })
            .boxed();

        Ok(stream)
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) -> TransportResult<()> {
        self.channel.close(REPLY_SUCCESS, "Closing channel").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_types_map_onto_lapin_kinds() {
        assert!(matches!(exchange_kind(ExchangeType::Direct), ExchangeKind::Direct));
        assert!(matches!(exchange_kind(ExchangeType::Fanout), ExchangeKind::Fanout));
        assert!(matches!(exchange_kind(ExchangeType::Topic), ExchangeKind::Topic));
    }

    #[tokio::test]
    #[ignore] // Requires a running RabbitMQ instance
    async fn connects_to_local_broker() {
        let params = ConnectionParams::default();
        let connection = AmqpConnector::new().connect(&params).await.unwrap();
        assert!(connection.is_open());

        let channel = connection.create_channel().await.unwrap();
        assert!(channel.is_open());

        channel.close().await.unwrap();
        connection.close().await.unwrap();
    }
}
