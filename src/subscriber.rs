// src/subscriber.rs

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures_lite::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec::{Codec, JsonCodec};
use crate::connection::{deadline, ConnectionManager, DEFAULT_CONNECT_TIMEOUT};
use crate::connection_string::ConnectionParams;
use crate::errors::{MessagingError, Result};
use crate::handler::MessageHandler;
use crate::message::Envelope;
use crate::metrics::{DeliveryMetrics, DeliverySnapshot};
use crate::transport::{
    BrokerChannel, Connector, ConsumerEvent, DeliveryStream, ExchangeType, InboundMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

/// Exchange binding declared (with the queue) before consuming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub exchange: String,
    pub routing_key: String,
    #[serde(default)]
    pub kind: ExchangeType,
}

impl Binding {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        kind: ExchangeType,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub queue: String,
    pub exclusive: bool,
    pub binding: Option<Binding>,
    pub consumer_tag_prefix: String,
    pub connect_timeout: Duration,
}

impl SubscriberConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exclusive: false,
            binding: None,
            consumer_tag_prefix: "telemetry-mq".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn bind(mut self, binding: Binding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.queue.is_empty() {
            return Err(MessagingError::InvalidArgument("queue name must not be empty".to_string()));
        }
        if self.binding.as_ref().is_some_and(|binding| binding.exchange.is_empty()) {
            return Err(MessagingError::InvalidArgument(
                "binding exchange must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the delivery loop needs, detached from the `Subscriber`.
struct DeliveryContext<H, C> {
    queue: String,
    consumer_tag: String,
    handler: Arc<H>,
    codec: Arc<C>,
    metrics: Arc<DeliveryMetrics>,
}

impl<H, C: Codec> DeliveryContext<H, C> {
    async fn run<M>(self, mut deliveries: DeliveryStream)
    where
        M: Envelope,
        H: MessageHandler<M>,
    {
        while let Some(event) = deliveries.next().await {
            match event {
                ConsumerEvent::Delivery(delivery) => self.dispatch::<M>(delivery),
                ConsumerEvent::Cancelled(reason) => {
                    info!(
                        queue = %self.queue,
                        consumer_tag = %self.consumer_tag,
                        "Consumer cancelled: {}",
                        reason
                    );
                }
                ConsumerEvent::ChannelShutdown(reason) => {
                    warn!(
                        queue = %self.queue,
                        consumer_tag = %self.consumer_tag,
                        "Channel shut down: {}",
                        reason
                    );
                }
            }
        }
        info!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Delivery stream ended");
    }

    fn dispatch<M>(&self, delivery: InboundMessage)
    where
        M: Envelope,
        H: MessageHandler<M>,
    {
        self.metrics.record_received();

        // Already acknowledged by the broker; an undecodable payload is lost here.
        let message: M = match self.codec.decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_decode_failure();
                warn!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    "Dropping delivery that could not be decoded: {}",
                    e
                );
                return;
            }
        };

        debug!(
            queue = %self.queue,
            message_id = %message.id(),
            operation_id = %message.operation_id(),
            "Received message"
        );

        let handler = Arc::clone(&self.handler);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let message_id = message.id();
            match handler.handle(message).await {
                Ok(()) => metrics.record_handled(),
                Err(e) => {
                    metrics.record_handler_failure();
                    error!(message_id = %message_id, "Receive handler failed: {:#}", e);
                }
            }
        });
    }
}

/// Consumes one queue and hands every decoded envelope to a handler.
///
/// Deliveries are auto-acknowledged. Each handler call runs on its own task,
/// so a slow or failing handler never holds up the delivery loop, and a
/// failure is never reported back to the broker. Handler tasks still running
/// at process exit are not waited for.
pub struct Subscriber<M, H, C = JsonCodec> {
    config: SubscriberConfig,
    manager: ConnectionManager,
    handler: Arc<H>,
    codec: Arc<C>,
    metrics: Arc<DeliveryMetrics>,
    state: SubscriptionState,
    consumer_tag: Option<String>,
    delivery_loop: Option<JoinHandle<()>>,
    _message: PhantomData<fn() -> M>,
}

impl<M, H> Subscriber<M, H, JsonCodec>
where
    M: Envelope,
    H: MessageHandler<M>,
{
    pub fn new(
        params: ConnectionParams,
        connector: Arc<dyn Connector>,
        config: SubscriberConfig,
        handler: H,
    ) -> Result<Self> {
        Self::with_codec(params, connector, config, handler, JsonCodec::new())
    }
}

impl<M, H, C> Subscriber<M, H, C>
where
    M: Envelope,
    H: MessageHandler<M>,
    C: Codec,
{
    pub fn with_codec(
        params: ConnectionParams,
        connector: Arc<dyn Connector>,
        config: SubscriberConfig,
        handler: H,
        codec: C,
    ) -> Result<Self> {
        config.validate()?;
        let manager =
            ConnectionManager::new(params, connector).with_connect_timeout(config.connect_timeout);

        Ok(Subscriber {
            config,
            manager,
            handler: Arc::new(handler),
            codec: Arc::new(codec),
            metrics: Arc::new(DeliveryMetrics::new()),
            state: SubscriptionState::Unsubscribed,
            consumer_tag: None,
            delivery_loop: None,
            _message: PhantomData,
        })
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn consumer_tag(&self) -> Option<&str> {
        self.consumer_tag.as_deref()
    }

    /// True while the consumer is registered on a live channel.
    pub fn is_subscribed(&self) -> bool {
        self.state == SubscriptionState::Subscribed
            && self.manager.is_open()
            && self
                .delivery_loop
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }

    pub fn metrics(&self) -> DeliverySnapshot {
        self.metrics.snapshot()
    }

    /// Opens the connection and channel, declares the binding if one is
    /// configured and registers the consumer.
    ///
    /// Does nothing when already subscribed on a live channel. After the
    /// broker dropped the consumer, calling this again starts a new one.
    pub async fn subscribe(&mut self) -> Result<()> {
        if self.is_subscribed() {
            debug!(queue = %self.config.queue, "Already subscribed");
            return Ok(());
        }

        self.stop_delivery_loop();
        self.state = SubscriptionState::Subscribing;

        match self.start_consuming().await {
            Ok(()) => {
                self.state = SubscriptionState::Subscribed;
                Ok(())
            }
            Err(e) => {
                error!(queue = %self.config.queue, "Failed to subscribe: {}", e);
                self.state = SubscriptionState::Unsubscribed;
                Err(e)
            }
        }
    }

    async fn start_consuming(&mut self) -> Result<()> {
        let channel = self.manager.get_channel().await?;
        let limit = self.config.connect_timeout;

        if let Some(binding) = &self.config.binding {
            declare_binding(channel.as_ref(), &self.config.queue, binding, limit).await?;
        }

        let consumer_tag = format!("{}-{}", self.config.consumer_tag_prefix, Uuid::new_v4());
        let deliveries = deadline(
            "registering consumer",
            limit,
            channel.consume(&self.config.queue, &consumer_tag, self.config.exclusive),
            MessagingError::ConsumeError,
        )
        .await?;

        info!(
            queue = %self.config.queue,
            consumer_tag = %consumer_tag,
            exclusive = self.config.exclusive,
            "Consumer registered"
        );

        let context = DeliveryContext {
            queue: self.config.queue.clone(),
            consumer_tag: consumer_tag.clone(),
            handler: Arc::clone(&self.handler),
            codec: Arc::clone(&self.codec),
            metrics: Arc::clone(&self.metrics),
        };
        self.delivery_loop = Some(tokio::spawn(context.run::<M>(deliveries)));
        self.consumer_tag = Some(consumer_tag);
        Ok(())
    }

    /// Stops consuming and closes the channel and connection. Safe to call
    /// more than once; handler tasks already started keep running.
    pub async fn unsubscribe(&mut self) -> Result<()> {
        if self.state == SubscriptionState::Unsubscribed && self.delivery_loop.is_none() {
            debug!(queue = %self.config.queue, "Not subscribed");
            // A failed subscribe may have left a connection behind.
            return self.manager.close().await;
        }

        self.state = SubscriptionState::Unsubscribing;
        self.stop_delivery_loop();
        let result = self.manager.close().await;
        self.state = SubscriptionState::Unsubscribed;
        info!(queue = %self.config.queue, "Unsubscribed");
        result
    }

    fn stop_delivery_loop(&mut self) {
        if let Some(task) = self.delivery_loop.take() {
            task.abort();
        }
        self.consumer_tag = None;
    }
}

impl<M, H, C> Drop for Subscriber<M, H, C> {
    fn drop(&mut self) {
        if let Some(task) = self.delivery_loop.take() {
            task.abort();
        }
    }
}

async fn declare_binding(
    channel: &dyn BrokerChannel,
    queue: &str,
    binding: &Binding,
    limit: Duration,
) -> Result<()> {
    deadline(
        "declaring exchange",
        limit,
        channel.declare_exchange(&binding.exchange, binding.kind),
        MessagingError::TopologyError,
    )
    .await?;
    deadline(
        "declaring queue",
        limit,
        channel.declare_queue(queue),
        MessagingError::TopologyError,
    )
    .await?;
    deadline(
        "binding queue",
        limit,
        channel.bind_queue(queue, &binding.exchange, &binding.routing_key),
        MessagingError::TopologyError,
    )
    .await?;

    info!(
        queue,
        exchange = %binding.exchange,
        routing_key = %binding.routing_key,
        "Queue bound"
    );
    Ok(())
}
