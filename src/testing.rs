//! Scripted channel and controller doubles for unit tests.
//!
//! [`FakeChannel`] records every call it receives and fails the operations a
//! test arms it to fail. [`FakeController`] hands out fake channels and
//! counts how often it was asked.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::domain::{
    //
    ActiveProbe,
    BrokerChannel,
    ChannelPtr,
    ConsumeMode,
    Controller,
    DeliveryStream,
    ExchangeKind,
    OutboundMessage,
};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) struct Published {
    pub destination: String,
    pub partition: String,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Calls {
    pub buffer: Vec<u16>,
    pub transactional: usize,
    pub exchanges: Vec<(String, ExchangeKind)>,
    pub queues: Vec<String>,
    pub transient_queues: usize,
    /// (queue, exchange)
    pub bindings: Vec<(String, String)>,
    /// (queue, consumer, mode)
    pub consumes: Vec<(String, String, ConsumeMode)>,
    pub cancels: Vec<String>,
    pub acks: Vec<(u64, bool)>,
    pub publishes: Vec<Published>,
    pub commits: usize,
    pub rollbacks: usize,
    pub closes: usize,
}

impl Calls {
    /// Number of calls that touch the broker at all.
    pub fn total(&self) -> usize {
        self.buffer.len()
            + self.transactional
            + self.exchanges.len()
            + self.queues.len()
            + self.transient_queues
            + self.bindings.len()
            + self.consumes.len()
            + self.cancels.len()
            + self.acks.len()
            + self.publishes.len()
            + self.commits
            + self.rollbacks
            + self.closes
    }
}

#[derive(Default)]
struct Failures {
    transactional: Option<Error>,
    publish: Option<Error>,
    commit: Option<Error>,
    rollback: Option<Error>,
    declare_queue: Option<Error>,
    consume: Option<Error>,
    declare_exchange: HashSet<String>,
    bind_exchange: HashSet<String>,
}

pub(crate) struct FakeChannel {
    id: u64,
    transient_name: String,
    calls: Mutex<Calls>,
    failures: Mutex<Failures>,
    stream: Mutex<Option<DeliveryStream>>,
}

impl FakeChannel {
    pub fn new(id: u64) -> Self {
        // ---
        Self {
            id,
            transient_name: format!("amq.gen-{id}"),
            calls: Mutex::new(Calls::default()),
            failures: Mutex::new(Failures::default()),
            stream: Mutex::new(None),
        }
    }

    /// Hand `stream` out on the next `consume`.
    pub fn with_stream(self, stream: DeliveryStream) -> Self {
        *self.stream.lock().unwrap() = Some(stream);
        self
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_transactional(&self, err: Error) {
        self.failures.lock().unwrap().transactional = Some(err);
    }

    pub fn fail_publish(&self, err: Error) {
        self.failures.lock().unwrap().publish = Some(err);
    }

    pub fn fail_commit(&self, err: Error) {
        self.failures.lock().unwrap().commit = Some(err);
    }

    pub fn fail_rollback(&self, err: Error) {
        self.failures.lock().unwrap().rollback = Some(err);
    }

    pub fn fail_declare_queue(&self, err: Error) {
        self.failures.lock().unwrap().declare_queue = Some(err);
    }

    pub fn fail_consume(&self, err: Error) {
        self.failures.lock().unwrap().consume = Some(err);
    }

    pub fn fail_declare_exchange(&self, exchange: &str) {
        self.failures.lock().unwrap().declare_exchange.insert(exchange.to_string());
    }

    pub fn fail_bind(&self, exchange: &str) {
        self.failures.lock().unwrap().bind_exchange.insert(exchange.to_string());
    }

    fn record(&self, f: impl FnOnce(&mut Calls)) {
        f(&mut self.calls.lock().unwrap());
    }

    fn armed(&self, f: impl FnOnce(&Failures) -> Option<Error>) -> Result<()> {
        match f(&self.failures.lock().unwrap()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl BrokerChannel for FakeChannel {
    fn id(&self) -> u64 {
        self.id
    }

    async fn configure_buffer(&self, messages: u16) -> Result<()> {
        self.record(|c| c.buffer.push(messages));
        Ok(())
    }

    async fn configure_transactional(&self) -> Result<()> {
        self.record(|c| c.transactional += 1);
        self.armed(|f| f.transactional.clone())
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()> {
        self.record(|c| c.exchanges.push((name.to_string(), kind)));
        self.armed(|f| {
            f.declare_exchange
                .contains(name)
                .then(|| Error::Channel(format!("declare {name} refused")))
        })
    }

    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.record(|c| c.queues.push(name.to_string()));
        self.armed(|f| f.declare_queue.clone())
    }

    async fn declare_transient_queue(&self) -> Result<String> {
        self.record(|c| c.transient_queues += 1);
        self.armed(|f| f.declare_queue.clone())?;
        Ok(self.transient_name.clone())
    }

    async fn bind_exchange_to_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.record(|c| c.bindings.push((queue.to_string(), exchange.to_string())));
        self.armed(|f| {
            f.bind_exchange
                .contains(exchange)
                .then(|| Error::Channel(format!("bind {exchange} refused")))
        })
    }

    async fn consume(
        &self,
        queue: &str,
        consumer: &str,
        mode: ConsumeMode,
    ) -> Result<DeliveryStream> {
        self.record(|c| c.consumes.push((queue.to_string(), consumer.to_string(), mode)));
        self.armed(|f| f.consume.clone())?;

        match self.stream.lock().unwrap().take() {
            Some(stream) => Ok(stream),
            None => {
                // No scripted deliveries: an already finished stream.
                let (_tx, rx) = mpsc::unbounded_channel();
                Ok(rx)
            }
        }
    }

    async fn cancel_consumer(&self, consumer: &str) -> Result<()> {
        self.record(|c| c.cancels.push(consumer.to_string()));
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.record(|c| c.acks.push((delivery_tag, multiple)));
        Ok(())
    }

    async fn publish(
        &self,
        destination: &str,
        partition: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        self.record(|c| {
            c.publishes.push(Published {
                destination: destination.to_string(),
                partition: partition.to_string(),
                message,
            })
        });
        self.armed(|f| f.publish.clone())
    }

    async fn commit_transaction(&self) -> Result<()> {
        self.record(|c| c.commits += 1);
        self.armed(|f| f.commit.clone())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        self.record(|c| c.rollbacks += 1);
        self.armed(|f| f.rollback.clone())
    }

    async fn close(&self) -> Result<()> {
        self.record(|c| c.closes += 1);
        Ok(())
    }
}

/// Controller double handing out a fresh [`FakeChannel`] per call.
#[derive(Default)]
pub(crate) struct FakeController {
    opens: AtomicUsize,
    unavailable: AtomicBool,
    prepared: Mutex<VecDeque<Arc<FakeChannel>>>,
    issued: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hand `channel` out on the next successful `open_channel`.
    pub fn prepare(&self, channel: FakeChannel) -> Arc<FakeChannel> {
        let channel = Arc::new(channel);
        self.prepared.lock().unwrap().push_back(channel.clone());
        channel
    }

    /// Simulate a controller that cannot open channels.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of times `open_channel` was invoked.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn issued(&self) -> Vec<Arc<FakeChannel>> {
        self.issued.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Arc<FakeChannel> {
        self.issued
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no channel issued yet")
    }
}

#[async_trait::async_trait]
impl Controller for FakeController {
    async fn open_channel(&self, probe: &dyn ActiveProbe) -> Option<ChannelPtr> {
        let opened = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if !probe.is_active() || self.unavailable.load(Ordering::SeqCst) {
            return None;
        }

        let channel = self
            .prepared
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Arc::new(FakeChannel::new(opened as u64)));
        self.issued.lock().unwrap().push(channel.clone());
        let channel: ChannelPtr = channel;
        Some(channel)
    }
}
