// src/domain/message.rs

//! Generic message envelopes exchanged with application code.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use super::channel::ChannelPtr;
use crate::Result;

/// Application headers, kept sorted so translation is deterministic.
pub type Headers = BTreeMap<String, String>;

/// An outbound message.
///
/// A `Dispatch` is supplied by the caller on every `write` and is never
/// modified by the writer.
///
/// # Example
///
/// ```
/// # use mom_pubsub::Dispatch;
/// let dispatch = Dispatch::new("orders", b"{}".to_vec())
///     .partition("eu-west")
///     .content_type("application/json")
///     .durable(true)
///     .header("tenant", "acme");
///
/// assert_eq!(dispatch.destination, "orders");
/// assert_eq!(dispatch.partition, "eu-west");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    // ---
    /// Exchange name, or `@routing-key` to publish through the default
    /// exchange with an explicit routing key.
    pub destination: String,

    /// Routing key hint. Ignored when `destination` carries its own key.
    pub partition: String,

    /// Opaque payload bytes.
    pub payload: Bytes,

    pub message_type: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub source_id: Option<String>,

    /// Ask the broker to persist the message.
    pub durable: bool,

    /// Time after which the broker may discard the message.
    pub expiration: Option<Duration>,

    /// Creation time. Stamped with the writer's clock when absent.
    pub timestamp: Option<SystemTime>,

    pub headers: Headers,
}

impl Dispatch {
    /// Create a dispatch for `destination` carrying `payload`.
    pub fn new(destination: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        // ---
        Self {
            destination: destination.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Acknowledgement handle bound to the channel a delivery arrived on.
#[derive(Clone)]
pub struct Acknowledger {
    channel: ChannelPtr,
    delivery_tag: u64,
}

impl Acknowledger {
    pub(crate) fn new(channel: ChannelPtr, delivery_tag: u64) -> Self {
        Self {
            channel,
            delivery_tag,
        }
    }

    /// The channel the delivery arrived on.
    pub fn channel(&self) -> &ChannelPtr {
        &self.channel
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }
}

impl fmt::Debug for Acknowledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acknowledger")
            .field("channel", &self.channel.id())
            .field("delivery_tag", &self.delivery_tag)
            .finish()
    }
}

/// An inbound message.
///
/// Ownership passes to whoever receives it from a subscription's output
/// sink; that consumer is responsible for acknowledging it.
#[derive(Clone, Debug)]
pub struct Delivery {
    // ---
    pub delivery_tag: u64,

    /// Exchange the message was published to; empty for the default exchange.
    pub exchange: String,
    pub routing_key: String,

    /// The broker has delivered this message before without an ack.
    pub redelivered: bool,

    pub message_type: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub source_id: Option<String>,
    pub durable: bool,
    pub expiration: Option<Duration>,
    pub timestamp: Option<SystemTime>,
    pub headers: Headers,
    pub payload: Bytes,

    pub acknowledger: Acknowledger,
}

impl Delivery {
    /// Acknowledge this delivery only.
    pub async fn acknowledge(&self) -> Result<()> {
        // ---
        let ack = &self.acknowledger;
        ack.channel.ack(ack.delivery_tag, false).await
    }

    /// Acknowledge every outstanding delivery on the same channel up to and
    /// including this one.
    pub async fn acknowledge_through(&self) -> Result<()> {
        // ---
        let ack = &self.acknowledger;
        ack.channel.ack(ack.delivery_tag, true).await
    }
}
