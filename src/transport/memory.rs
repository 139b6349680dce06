//! In-memory broker.
//!
//! This module provides a pure in-process implementation of the
//! [`Controller`] and [`BrokerChannel`] contracts. It is intended for
//! testing, local execution, and as the reference for channel semantics.
//!
//! ## Reference Semantics
//!
//! - Exchanges are durable and declared idempotently; redeclaring with a
//!   different kind fails. Fanout exchanges copy every message to every
//!   bound queue; other kinds route on an exact binding-key match.
//! - Publishing to the default exchange (`""`) routes to the queue named by
//!   the routing key. Unroutable messages are dropped, as a broker would.
//! - Transient queues get broker-assigned `amq.gen-N` names and are deleted
//!   once their last consumer goes away.
//! - Delivery tags are per channel, start at 1 and only increase.
//! - Prefetch limits unacknowledged deliveries per channel; further
//!   messages wait in the queue until acknowledgements free capacity.
//! - Committing a transaction that holds a publish to a missing exchange
//!   fails the whole batch and closes the channel.
//! - Cancelling a consumer or closing its channel ends the consumer's
//!   delivery stream. Closing a channel requeues its unacknowledged
//!   messages, flagged as redelivered.
//!
//! ## Non-Goals
//!
//! Persistence, connection loss, and exact emulation of any broker's error
//! codes are out of scope.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    // ---
    log_debug,
    resolve_route,
    ActiveProbe,
    BrokerChannel,
    ChannelPtr,
    ConsumeMode,
    Controller,
    DeliveryStream,
    Error,
    ExchangeKind,
    MessageProperties,
    OutboundMessage,
    RawDelivery,
    Result,
};

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    redelivered: bool,
    properties: MessageProperties,
    body: Bytes,
}

struct Exchange {
    kind: ExchangeKind,
    /// (queue, binding key)
    bindings: Vec<(String, String)>,
}

struct Consumer {
    channel_id: u64,
    tag: String,
    exclusive: bool,
    auto_ack: bool,
    sender: mpsc::UnboundedSender<RawDelivery>,
}

#[derive(Default)]
struct Queue {
    auto_delete: bool,
    messages: VecDeque<Message>,
    consumers: Vec<Consumer>,
    cursor: usize,
}

#[derive(Default)]
struct ChannelState {
    prefetch: u16,
    transactional: bool,
    next_tag: u64,
    /// delivery tag → (queue, message)
    unacked: BTreeMap<u64, (String, Message)>,
    /// Publishes held back until commit: (exchange, routing key, message)
    pending: Vec<(String, String, Message)>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    channels: HashMap<u64, ChannelState>,
    next_channel: u64,
    next_queue: u64,
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl BrokerState {
    fn channel(&mut self, id: u64) -> Result<&mut ChannelState> {
        self.channels.get_mut(&id).ok_or(Error::ChannelClosed)
    }

    /// Queues a publish to `exchange` with `routing_key` lands in.
    fn targets(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>> {
        // ---
        if exchange.is_empty() {
            return Ok(vec![routing_key.to_string()]);
        }

        let Some(found) = self.exchanges.get(exchange) else {
            return Err(Error::Publish(format!("no exchange [{exchange}]")));
        };
        Ok(found
            .bindings
            .iter()
            .filter(|(_, key)| found.kind == ExchangeKind::Fanout || key == routing_key)
            .map(|(queue, _)| queue.clone())
            .collect())
    }

    fn route(&mut self, exchange: &str, routing_key: &str, message: Message) -> Result<()> {
        let targets = self.targets(exchange, routing_key)?;
        self.deliver(targets, message);
        Ok(())
    }

    fn deliver(&mut self, targets: Vec<String>, message: Message) {
        // ---
        for target in targets {
            if let Some(queue) = self.queues.get_mut(&target) {
                queue.messages.push_back(message.clone());
                self.pump(&target);
            }
        }
    }

    /// Push waiting messages of `queue_name` to consumers with capacity.
    fn pump(&mut self, queue_name: &str) {
        // ---
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        'messages: while let Some(message) = queue.messages.pop_front() {
            let count = queue.consumers.len();
            for offset in 0..count {
                let index = (queue.cursor + offset) % count;
                let consumer = &queue.consumers[index];
                let Some(channel) = self.channels.get_mut(&consumer.channel_id) else {
                    continue;
                };

                let limited = !consumer.auto_ack && channel.prefetch > 0;
                if limited && channel.unacked.len() >= usize::from(channel.prefetch) {
                    continue;
                }

                let tag = channel.next_tag + 1;
                let raw = RawDelivery {
                    delivery_tag: tag,
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                    redelivered: message.redelivered,
                    properties: message.properties.clone(),
                    body: message.body.clone(),
                };

                if consumer.sender.send(raw).is_ok() {
                    channel.next_tag = tag;
                    if !consumer.auto_ack {
                        channel.unacked.insert(tag, (queue_name.to_string(), message));
                    }
                    queue.cursor = index + 1;
                    continue 'messages;
                }
            }

            queue.messages.push_front(message);
            break;
        }
    }

    fn remove_consumers(&mut self, channel_id: u64, tag: Option<&str>) {
        // ---
        let mut emptied = Vec::new();
        for (name, queue) in self.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| {
                c.channel_id != channel_id || tag.is_some_and(|tag| c.tag != tag)
            });
            if before != queue.consumers.len() && queue.consumers.is_empty() && queue.auto_delete {
                emptied.push(name.clone());
            }
        }

        for name in emptied {
            log_debug!("memory broker: auto-deleting queue [{name}]");
            self.queues.remove(&name);
            for exchange in self.exchanges.values_mut() {
                exchange.bindings.retain(|(queue, _)| *queue != name);
            }
        }
    }

    fn close_channel(&mut self, channel_id: u64) {
        // ---
        let Some(state) = self.channels.remove(&channel_id) else {
            return;
        };

        self.remove_consumers(channel_id, None);

        let mut touched = Vec::new();
        for (_, (queue_name, mut message)) in state.unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&queue_name) {
                message.redelivered = true;
                queue.messages.push_front(message);
                touched.push(queue_name);
            }
        }

        touched.sort();
        touched.dedup();
        for queue_name in touched {
            self.pump(&queue_name);
        }
    }
}

/// In-process broker acting as the channel [`Controller`].
///
/// Cloning the broker is cheap; clones share all exchanges, queues and
/// channels.
///
/// ```
/// # use mom_pubsub::{BrokerChannel, Controller, MemoryBroker};
/// # async fn example() {
/// let broker = MemoryBroker::new();
/// let channel = broker.open_channel(&|| true).await.expect("channel");
/// channel.declare_queue("audit").await.expect("declare");
/// assert_eq!(broker.queue_depth("audit"), Some(0));
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a broker that cannot open new channels.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Messages waiting in `queue` that have not been delivered yet.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|q| q.messages.len())
    }

    /// Number of consumers attached to `queue`.
    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|q| q.consumers.len())
    }

    /// Deliveries on `channel_id` still awaiting acknowledgement.
    pub fn unacked(&self, channel_id: u64) -> usize {
        self.lock()
            .channels
            .get(&channel_id)
            .map_or(0, |c| c.unacked.len())
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.lock().exchanges.contains_key(name)
    }

    /// Number of channels currently open.
    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        lock_ignore_poison(&self.state)
    }
}

#[async_trait::async_trait]
impl Controller for MemoryBroker {
    async fn open_channel(&self, probe: &dyn ActiveProbe) -> Option<ChannelPtr> {
        // ---
        if !probe.is_active() || self.unavailable.load(Ordering::SeqCst) {
            return None;
        }

        let mut state = self.lock();
        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(id, ChannelState::default());
        log_debug!("memory broker: opened channel {id}");

        let channel: ChannelPtr = Arc::new(MemoryChannel {
            id,
            state: Arc::clone(&self.state),
        });
        Some(channel)
    }
}

/// One channel on a [`MemoryBroker`].
///
/// Dropping the last reference closes the channel.
pub struct MemoryChannel {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryChannel {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        lock_ignore_poison(&self.state)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.lock().close_channel(self.id);
    }
}

#[async_trait::async_trait]
impl BrokerChannel for MemoryChannel {
    fn id(&self) -> u64 {
        self.id
    }

    async fn configure_buffer(&self, messages: u16) -> Result<()> {
        self.lock().channel(self.id)?.prefetch = messages;
        Ok(())
    }

    async fn configure_transactional(&self) -> Result<()> {
        self.lock().channel(self.id)?.transactional = true;
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        // ---
        let mut state = self.lock();
        state.channel(self.id)?;

        if let Some(existing) = state.exchanges.get(name) {
            if existing.kind != kind {
                return Err(Error::Channel(format!(
                    "exchange [{name}] already declared as {}",
                    existing.kind
                )));
            }
            return Ok(());
        }

        state.exchanges.insert(
            name.to_string(),
            Exchange {
                kind,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<()> {
        // ---
        let mut state = self.lock();
        state.channel(self.id)?;
        state.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn declare_transient_queue(&self) -> Result<String> {
        // ---
        let mut state = self.lock();
        state.channel(self.id)?;

        state.next_queue += 1;
        let name = format!("amq.gen-{}", state.next_queue);
        state.queues.insert(
            name.clone(),
            Queue {
                auto_delete: true,
                ..Queue::default()
            },
        );
        Ok(name)
    }

    async fn bind_exchange_to_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        // ---
        let mut state = self.lock();
        state.channel(self.id)?;

        if !state.queues.contains_key(queue) {
            return Err(Error::Channel(format!("no queue [{queue}]")));
        }
        let Some(found) = state.exchanges.get_mut(exchange) else {
            return Err(Error::Channel(format!("no exchange [{exchange}]")));
        };

        let binding = (queue.to_string(), String::new());
        if !found.bindings.contains(&binding) {
            found.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer: &str,
        mode: ConsumeMode,
    ) -> Result<DeliveryStream> {
        // ---
        let mut state = self.lock();
        state.channel(self.id)?;

        let Some(target) = state.queues.get_mut(queue) else {
            return Err(Error::Channel(format!("no queue [{queue}]")));
        };
        if target.consumers.iter().any(|c| c.exclusive)
            || (mode.exclusive && !target.consumers.is_empty())
        {
            return Err(Error::Channel(format!("queue [{queue}] is locked by an exclusive consumer")));
        }
        if target
            .consumers
            .iter()
            .any(|c| c.channel_id == self.id && c.tag == consumer)
        {
            return Err(Error::Channel(format!("consumer tag [{consumer}] already in use")));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        target.consumers.push(Consumer {
            channel_id: self.id,
            tag: consumer.to_string(),
            exclusive: mode.exclusive,
            auto_ack: mode.auto_ack,
            sender,
        });

        state.pump(queue);
        Ok(receiver)
    }

    async fn cancel_consumer(&self, consumer: &str) -> Result<()> {
        // ---
        let mut state = self.lock();
        state.channel(self.id)?;
        state.remove_consumers(self.id, Some(consumer));
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        // ---
        let mut state = self.lock();
        let channel = state.channel(self.id)?;

        let acked: Vec<(u64, (String, Message))> = if multiple {
            let keep = channel.unacked.split_off(&delivery_tag.saturating_add(1));
            std::mem::replace(&mut channel.unacked, keep).into_iter().collect()
        } else {
            match channel.unacked.remove(&delivery_tag) {
                Some(entry) => vec![(delivery_tag, entry)],
                None => Vec::new(),
            }
        };

        if acked.is_empty() {
            return Err(Error::Channel(format!("unknown delivery tag {delivery_tag}")));
        }

        let mut queues: Vec<String> = acked.into_iter().map(|(_, (queue, _))| queue).collect();
        queues.sort();
        queues.dedup();
        for queue in queues {
            state.pump(&queue);
        }
        Ok(())
    }

    async fn publish(
        &self,
        destination: &str,
        partition: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        // ---
        let route = resolve_route(destination, partition);
        let message = Message {
            exchange: route.exchange.to_string(),
            routing_key: route.routing_key.to_string(),
            redelivered: false,
            properties: message.properties,
            body: message.body,
        };

        let mut state = self.lock();
        let channel = state.channel(self.id).map_err(|_| Error::Publish("channel closed".into()))?;
        if channel.transactional {
            channel
                .pending
                .push((route.exchange.to_string(), route.routing_key.to_string(), message));
            return Ok(());
        }

        state.route(route.exchange, route.routing_key, message)
    }

    async fn commit_transaction(&self) -> Result<()> {
        // ---
        let mut state = self.lock();
        let channel = state.channel(self.id).map_err(|err| Error::Commit(err.to_string()))?;
        if !channel.transactional {
            return Err(Error::Commit("channel is not transactional".into()));
        }

        // A publish to a missing exchange fails the whole batch and closes
        // the channel, as a broker channel exception would.
        let pending = std::mem::take(&mut channel.pending);
        let mut batch = Vec::with_capacity(pending.len());
        for (exchange, routing_key, message) in pending {
            match state.targets(&exchange, &routing_key) {
                Ok(targets) => batch.push((targets, message)),
                Err(err) => {
                    log_debug!("memory broker: channel {} commit refused: {err}", self.id);
                    state.close_channel(self.id);
                    return Err(Error::Commit(err.to_string()));
                }
            }
        }

        for (targets, message) in batch {
            state.deliver(targets, message);
        }
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        // ---
        let mut state = self.lock();
        let channel = state.channel(self.id).map_err(|err| Error::Rollback(err.to_string()))?;
        if !channel.transactional {
            return Err(Error::Rollback("channel is not transactional".into()));
        }

        channel.pending.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        log_debug!("memory broker: closing channel {}", self.id);
        self.lock().close_channel(self.id);
        Ok(())
    }
}
