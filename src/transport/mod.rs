// src/transport/mod.rs
// Broker abstraction: connector -> connection -> channel.

pub mod amqp;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::connection_string::ConnectionParams;
use crate::errors::TransportError;

pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Stream of consumer events for one `basic.consume` registration.
pub type DeliveryStream = BoxStream<'static, ConsumerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    #[default]
    Direct,
    Fanout,
    Topic,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Direct => "direct",
            ExchangeType::Fanout => "fanout",
            ExchangeType::Topic => "topic",
        }
    }
}

/// Properties attached to an outgoing message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundProperties {
    pub message_id: String,
    pub correlation_id: String,
    pub content_type: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    Delivery(InboundMessage),
    /// The broker cancelled the consumer.
    Cancelled(String),
    /// The channel carrying the consumer failed or was shut down.
    ChannelShutdown(String),
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> TransportResult<Box<dyn BrokerConnection>>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> TransportResult<Arc<dyn BrokerChannel>>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> TransportResult<()>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a durable exchange. Redeclaring with the same type is a no-op.
    async fn declare_exchange(&self, name: &str, kind: ExchangeType) -> TransportResult<()>;

    /// Declares a durable queue. Redeclaring is a no-op.
    async fn declare_queue(&self, name: &str) -> TransportResult<()>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> TransportResult<()>;

    /// Hands the payload to the broker. Broker confirms are not awaited.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: OutboundProperties,
    ) -> TransportResult<()>;

    /// Registers an auto-acknowledging consumer on `queue`.
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        exclusive: bool,
    ) -> TransportResult<DeliveryStream>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> TransportResult<()>;
}
