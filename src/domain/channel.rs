// src/domain/channel.rs

//! Broker channel domain abstractions.
//!
//! A [`BrokerChannel`] is one logical duplex path over a broker connection.
//! Channels are opened and owned by a [`Controller`]; writers and
//! subscriptions borrow exactly one channel at a time and never share it
//! with another instance.
//!
//! Concrete implementations live under `src/transport/`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::message::Headers;
use crate::Result;

/// Kind of exchange to declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Every bound queue receives a copy of every message.
    Fanout,
    /// Messages are routed to queues whose binding key equals the routing key.
    Direct,
    /// Messages are routed by pattern-matching the routing key.
    Topic,
}

impl ExchangeKind {
    /// Wire name of the exchange kind.
    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a consumer attaches to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeMode {
    /// Only this consumer may be attached to the queue.
    pub exclusive: bool,
    /// The broker treats deliveries as acknowledged on send.
    pub auto_ack: bool,
}

impl ConsumeMode {
    /// Non-exclusive consumer requiring explicit acknowledgement.
    pub const SHARED: ConsumeMode = ConsumeMode {
        exclusive: false,
        auto_ack: false,
    };

    /// Exclusive consumer requiring explicit acknowledgement.
    pub const EXCLUSIVE: ConsumeMode = ConsumeMode {
        exclusive: true,
        auto_ack: false,
    };
}

/// Message properties carried on the wire alongside the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub message_type: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Identifier of the publishing application.
    pub app_id: Option<String>,
    pub timestamp: Option<SystemTime>,
    /// Ask the broker to persist the message to disk.
    pub persistent: bool,
    pub expiration: Option<Duration>,
    pub headers: Headers,
}

/// Wire envelope handed to [`BrokerChannel::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub properties: MessageProperties,
    pub body: Bytes,
}

/// A delivery exactly as the broker handed it to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelivery {
    /// Channel-scoped, monotonically increasing delivery tag.
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub body: Bytes,
}

/// Stream of raw deliveries for one consumer.
///
/// The stream ends (`recv()` yields `None`) when the consumer is cancelled,
/// the channel is closed, or the connection is lost.
///
/// The stream itself is unbounded. How many deliveries can be outstanding
/// is governed by the broker through
/// [`configure_buffer`](BrokerChannel::configure_buffer), never by the
/// stream's capacity.
pub type DeliveryStream = mpsc::UnboundedReceiver<RawDelivery>;

/// One channel over a broker connection.
///
/// Implementations must be safe to call from the single instance that owns
/// the channel; the owning writer or subscription never issues calls for
/// the same channel from two instances.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync {
    // ---
    /// Identifier of the channel, used for logging only.
    fn id(&self) -> u64;

    /// Limit the number of unacknowledged deliveries the broker pushes.
    async fn configure_buffer(&self, messages: u16) -> Result<()>;

    /// Put the channel into transactional mode.
    async fn configure_transactional(&self) -> Result<()>;

    /// Declare a durable exchange. Repeating the declare is harmless.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<()>;

    /// Declare a durable, named queue.
    async fn declare_queue(&self, name: &str) -> Result<()>;

    /// Declare a non-durable, auto-delete queue and return the name the
    /// broker assigned to it.
    async fn declare_transient_queue(&self) -> Result<String>;

    /// Bind `queue` to `exchange` with an empty binding key.
    async fn bind_exchange_to_queue(&self, queue: &str, exchange: &str) -> Result<()>;

    /// Start a consumer named `consumer` on `queue`.
    async fn consume(&self, queue: &str, consumer: &str, mode: ConsumeMode)
        -> Result<DeliveryStream>;

    /// Ask the broker to cancel the named consumer. The broker ends the
    /// consumer's delivery stream in response.
    async fn cancel_consumer(&self, consumer: &str) -> Result<()>;

    /// Acknowledge `delivery_tag`, or every outstanding tag up to and
    /// including it when `multiple` is set.
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()>;

    /// Publish `message` addressed by `destination` and `partition`.
    ///
    /// See [`resolve_route`](crate::resolve_route) for the addressing rules.
    async fn publish(&self, destination: &str, partition: &str, message: OutboundMessage)
        -> Result<()>;

    async fn commit_transaction(&self) -> Result<()>;

    async fn rollback_transaction(&self) -> Result<()>;

    /// Close the channel. A closed channel is never reused.
    async fn close(&self) -> Result<()>;
}

/// Shared channel pointer.
///
/// Cloning only bumps a reference count; every clone refers to the same
/// broker channel.
pub type ChannelPtr = Arc<dyn BrokerChannel>;

/// Reports whether the instance asking for a channel still wants one.
///
/// The probe is invoked by the [`Controller`] while the requesting writer
/// holds its acquisition lock. Implementations must not try to take that
/// lock again.
pub trait ActiveProbe: Send + Sync {
    fn is_active(&self) -> bool;
}

impl<F> ActiveProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_active(&self) -> bool {
        self()
    }
}

/// Owner of the physical broker connections.
///
/// The controller decides when a new channel may be opened and encapsulates
/// any reconnect policy. `open_channel` may be called concurrently from
/// many writers and subscriptions.
#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    // ---
    /// Open a fresh channel, or return `None` when the probe reports the
    /// caller inactive or no channel can be opened.
    async fn open_channel(&self, probe: &dyn ActiveProbe) -> Option<ChannelPtr>;
}

/// Shared controller pointer.
pub type ControllerPtr = Arc<dyn Controller>;
