//! Publish/subscribe core for telemetry messages over AMQP 0-9-1.
//!
//! A [`Publisher`] stamps and sends envelopes to an exchange, a [`Subscriber`]
//! consumes a queue and hands decoded envelopes to a [`MessageHandler`], and
//! [`PersistHandler`] writes them to a [`Store`] with rollback on failure.
//! [`InProcessPublisher`] fans messages out inside one process without a broker.

pub mod codec;
pub mod config;
pub mod connection;
pub mod connection_string;
pub mod errors;
pub mod fanout;
pub mod handler;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod persist;
pub mod publisher;
pub mod subscriber;
pub mod transport;

pub use codec::{Codec, JsonCodec};
pub use config::MessagingConfig;
pub use connection::ConnectionManager;
pub use connection_string::ConnectionParams;
pub use errors::{MessagingError, Result, StoreError, TransportError};
pub use fanout::{Dispatch, DispatchReport, InProcessPublisher, SharedHandler};
pub use handler::{handler_fn, FnHandler, MessageHandler};
pub use message::{
    DependencyMessage, Envelope, ErrorMessage, EventMessage, MessageHeader, MessageKind,
    MetricMessage, PageViewMessage, RequestMessage, SeverityLevel, TestMessage, TraceMessage,
};
pub use metrics::{DeliveryMetrics, DeliverySnapshot, PersistMetrics, PersistSnapshot};
pub use persist::{MemoryStore, PersistHandler, Store, ToRecord, Transaction};
pub use publisher::{Publisher, PublisherConfig};
pub use subscriber::{Binding, Subscriber, SubscriberConfig, SubscriptionState};
pub use transport::{AmqpConnector, Connector, ExchangeType, MemoryBroker};
