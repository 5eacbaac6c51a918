// src/transport/memory.rs
//! In-process broker.
//!
//! Models the parts of AMQP 0-9-1 routing the messaging core relies on:
//! direct, fanout and topic exchanges, the default exchange (routing key =
//! queue name), durable queues that buffer until a consumer attaches,
//! round-robin delivery between competing consumers and exclusive consumers.
//! Everything lives in memory; nothing survives the process.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    BrokerChannel, BrokerConnection, Connector, ConsumerEvent, DeliveryStream, ExchangeType,
    InboundMessage, OutboundProperties, TransportResult,
};
use crate::connection_string::ConnectionParams;
use crate::errors::TransportError;

/// Counters of client-visible broker operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub channels_opened: usize,
    pub channels_closed: usize,
    pub published: usize,
    pub routed: usize,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, MemoryExchange>,
    queues: HashMap<String, MemoryQueue>,
    connections: HashMap<u64, Arc<AtomicBool>>,
    next_id: u64,
    next_delivery_tag: u64,
    refuse_connections: bool,
    stats: BrokerStats,
}

struct MemoryExchange {
    kind: ExchangeType,
    bindings: Vec<(String, String)>,
}

#[derive(Default)]
struct MemoryQueue {
    buffer: VecDeque<InboundMessage>,
    consumers: Vec<QueueConsumer>,
    next: usize,
}

struct QueueConsumer {
    connection_id: u64,
    channel_id: u64,
    tag: String,
    exclusive: bool,
    sender: mpsc::UnboundedSender<ConsumerEvent>,
}

fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && matches(rest, &key[1..]),
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

impl MemoryExchange {
    fn routes(&self, binding_key: &str, routing_key: &str) -> bool {
        match self.kind {
            ExchangeType::Direct => binding_key == routing_key,
            ExchangeType::Fanout => true,
            ExchangeType::Topic => topic_matches(binding_key, routing_key),
        }
    }
}

impl MemoryQueue {
    fn enqueue(&mut self, message: InboundMessage) {
        self.consumers.retain(|consumer| !consumer.sender.is_closed());

        while !self.consumers.is_empty() {
            let idx = self.next % self.consumers.len();
            if self.consumers[idx]
                .sender
                .send(ConsumerEvent::Delivery(message.clone()))
                .is_ok()
            {
                self.next = idx + 1;
                return;
            }
            self.consumers.remove(idx);
        }

        self.buffer.push_back(message);
    }

    fn cancel_where(&mut self, event: &ConsumerEvent, predicate: impl Fn(&QueueConsumer) -> bool) {
        self.consumers.retain(|consumer| {
            if predicate(consumer) {
                let _ = consumer.sender.send(event.clone());
                false
            } else {
                true
            }
        });
    }
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn declare_exchange(&mut self, name: &str, kind: ExchangeType) -> TransportResult<()> {
        if name.is_empty() {
            return Err("ACCESS_REFUSED - the default exchange cannot be declared".into());
        }
        match self.exchanges.get(name) {
            Some(existing) if existing.kind != kind => Err(TransportError::Broker(format!(
                "PRECONDITION_FAILED - exchange '{}' already declared as {}",
                name,
                existing.kind.as_str()
            ))),
            Some(_) => Ok(()),
            None => {
                self.exchanges.insert(
                    name.to_string(),
                    MemoryExchange {
                        kind,
                        bindings: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn declare_queue(&mut self, name: &str) -> TransportResult<()> {
        if name.is_empty() {
            return Err("queue name must not be empty".into());
        }
        self.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    fn bind(&mut self, queue: &str, exchange: &str, routing_key: &str) -> TransportResult<()> {
        if !self.queues.contains_key(queue) {
            return Err(TransportError::Broker(format!("NOT_FOUND - no queue '{}'", queue)));
        }
        let target = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| {
                TransportError::Broker(format!("NOT_FOUND - no exchange '{}'", exchange))
            })?;

        let binding = (queue.to_string(), routing_key.to_string());
        if !target.bindings.contains(&binding) {
            target.bindings.push(binding);
        }
        Ok(())
    }

    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> TransportResult<usize> {
        self.stats.published += 1;

        let mut targets: Vec<String> = if exchange.is_empty() {
            self.queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect()
        } else {
            let source = self.exchanges.get(exchange).ok_or_else(|| {
                TransportError::Broker(format!("NOT_FOUND - no exchange '{}'", exchange))
            })?;
            source
                .bindings
                .iter()
                .filter(|(_, binding_key)| source.routes(binding_key, routing_key))
                .map(|(queue, _)| queue.clone())
                .collect()
        };
        // One copy per queue, however many of its bindings match.
        let mut seen = HashSet::new();
        targets.retain(|queue| seen.insert(queue.clone()));

        for queue in &targets {
            self.next_delivery_tag += 1;
            let message = InboundMessage {
                payload: payload.clone(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                delivery_tag: self.next_delivery_tag,
                redelivered: false,
            };
            if let Some(target) = self.queues.get_mut(queue) {
                target.enqueue(message);
                self.stats.routed += 1;
            }
        }

        // Unroutable messages are dropped, as the broker does for non-mandatory publishes.
        if targets.is_empty() {
            debug!(exchange, routing_key, "Message was unroutable and has been dropped");
        }
        Ok(targets.len())
    }

    fn consume(
        &mut self,
        connection_id: u64,
        channel_id: u64,
        queue: &str,
        consumer_tag: &str,
        exclusive: bool,
    ) -> TransportResult<mpsc::UnboundedReceiver<ConsumerEvent>> {
        let target = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::Broker(format!("NOT_FOUND - no queue '{}'", queue)))?;
        target.consumers.retain(|consumer| !consumer.sender.is_closed());

        if target.consumers.iter().any(|consumer| consumer.exclusive) {
            return Err(TransportError::Broker(format!(
                "ACCESS_REFUSED - queue '{}' has an exclusive consumer",
                queue
            )));
        }
        if exclusive && !target.consumers.is_empty() {
            return Err(TransportError::Broker(format!(
                "ACCESS_REFUSED - queue '{}' already has consumers",
                queue
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        for message in target.buffer.drain(..) {
            let _ = sender.send(ConsumerEvent::Delivery(message));
        }
        target.consumers.push(QueueConsumer {
            connection_id,
            channel_id,
            tag: consumer_tag.to_string(),
            exclusive,
            sender,
        });
        Ok(receiver)
    }

    fn cancel_consumers(
        &mut self,
        event: ConsumerEvent,
        predicate: impl Fn(&QueueConsumer) -> bool,
    ) {
        for queue in self.queues.values_mut() {
            queue.cancel_where(&event, &predicate);
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> TransportResult<MutexGuard<'_, BrokerState>> {
        self.state
            .lock()
            .map_err(|_| TransportError::Broker("broker state lock poisoned".to_string()))
    }

    fn read(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> BrokerStats {
        self.read().stats
    }

    /// Makes subsequent connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.read().refuse_connections = refuse;
    }

    /// Simulates the broker dropping every open connection.
    pub fn drop_connections(&self) {
        let mut state = self.read();
        for open in state.connections.values() {
            open.store(false, Ordering::SeqCst);
        }
        state.connections.clear();
        state.cancel_consumers(
            ConsumerEvent::ChannelShutdown("connection dropped by broker".to_string()),
            |_| true,
        );
    }

    pub fn declare_exchange(&self, name: &str, kind: ExchangeType) -> TransportResult<()> {
        self.lock()?.declare_exchange(name, kind)
    }

    pub fn declare_queue(&self, name: &str) -> TransportResult<()> {
        self.lock()?.declare_queue(name)
    }

    pub fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> TransportResult<()> {
        self.lock()?.bind(queue, exchange, routing_key)
    }

    /// Publishes raw bytes without going through a client connection.
    pub fn inject(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: impl Into<Vec<u8>>,
    ) -> TransportResult<usize> {
        self.lock()?.route(exchange, routing_key, payload.into())
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.read()
            .queues
            .get(queue)
            .map_or(0, |q| q.buffer.len())
    }

    pub fn consumer_tags(&self, queue: &str) -> Vec<String> {
        self.read()
            .queues
            .get(queue)
            .map(|q| {
                q.consumers
                    .iter()
                    .filter(|consumer| !consumer.sender.is_closed())
                    .map(|consumer| consumer.tag.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(
        &self,
        params: &ConnectionParams,
    ) -> TransportResult<Box<dyn BrokerConnection>> {
        let mut state = self.lock()?;
        if state.refuse_connections {
            return Err(TransportError::Broker(format!(
                "connection refused by {}:{}",
                params.host, params.port
            )));
        }

        let id = state.next_id();
        let open = Arc::new(AtomicBool::new(true));
        state.connections.insert(id, Arc::clone(&open));
        state.stats.connections_opened += 1;
        debug!(connection_id = id, vhost = %params.vhost, "In-memory connection opened");

        Ok(Box::new(MemoryConnection {
            id,
            broker: self.clone(),
            open,
        }))
    }
}

pub struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> TransportResult<Arc<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err("connection is closed".into());
        }
        let mut state = self.broker.lock()?;
        let id = state.next_id();
        state.stats.channels_opened += 1;

        Ok(Arc::new(MemoryChannel {
            id,
            connection_id: self.id,
            broker: self.broker.clone(),
            open: AtomicBool::new(true),
            connection_open: Arc::clone(&self.open),
        }))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err("connection is already closed".into());
        }
        let mut state = self.broker.lock()?;
        state.connections.remove(&self.id);
        state.stats.connections_closed += 1;
        let connection_id = self.id;
        state.cancel_consumers(
            ConsumerEvent::ChannelShutdown("connection closed".to_string()),
            |consumer| consumer.connection_id == connection_id,
        );
        Ok(())
    }
}

pub struct MemoryChannel {
    id: u64,
    connection_id: u64,
    broker: MemoryBroker,
    open: AtomicBool,
    connection_open: Arc<AtomicBool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> TransportResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err("channel is closed".into())
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeType) -> TransportResult<()> {
        self.ensure_open()?;
        self.broker.declare_exchange(name, kind)
    }

    async fn declare_queue(&self, name: &str) -> TransportResult<()> {
        self.ensure_open()?;
        self.broker.declare_queue(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        self.broker.bind(queue, exchange, routing_key)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        _properties: OutboundProperties,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        self.broker.lock()?.route(exchange, routing_key, payload)?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        exclusive: bool,
    ) -> TransportResult<DeliveryStream> {
        self.ensure_open()?;
        let receiver = self.broker.lock()?.consume(
            self.connection_id,
            self.id,
            queue,
            consumer_tag,
            exclusive,
        )?;

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        });
        Ok(stream.boxed())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err("channel is already closed".into());
        }
        let mut state = self.broker.lock()?;
        state.stats.channels_closed += 1;
        let channel_id = self.id;
        state.cancel_consumers(
            ConsumerEvent::Cancelled("channel closed".to_string()),
            |consumer| consumer.channel_id == channel_id,
        );
        Ok(())
    }
}
