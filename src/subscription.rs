//! Queue subscription.
//!
//! A [`Subscription`] owns one channel dedicated to consuming a single queue.
//! [`Subscription::listen`] runs the whole lifecycle and is meant to be
//! driven on its own task:
//!
//! ```text
//! Created ─► Configuring ─► Consuming ─► Draining ─► Closed
//!                 │                          ▲
//!                 └── setup failed ──────────┘ (zero summary)
//! ```
//!
//! - **Configuring**: prefetch is set to the output sink's capacity, the
//!   queue is declared (durable when named, transient otherwise) and every
//!   binding exchange is declared as fanout and bound. Exchange failures
//!   are logged and skipped.
//! - **Consuming**: a named queue gets a shared consumer, a transient queue
//!   an exclusive one. Both require explicit acknowledgement.
//! - **Draining**: deliveries are forwarded to the output sink in broker
//!   order until the broker ends the stream. That is the only way the loop
//!   ends; [`Subscription::close`] asks the broker to cancel the consumer
//!   and the broker then ends the stream.
//! - **Closed**: exactly one [`SubscriptionClosed`] summary is posted to the
//!   control sink so the owner can settle unacknowledged deliveries.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::clock::{consumer_name, system_clock, ClockPtr};
use crate::domain::{ChannelPtr, ConsumeMode, Delivery, DeliveryStream, ExchangeKind};
use crate::envelope::from_raw;
use crate::{log_debug, log_error, log_info, log_warn, Error, Result};

/// Queue and bindings a subscription consumes from.
///
/// ```
/// # use mom_pubsub::SubscriptionConfig;
/// let config: SubscriptionConfig =
///     serde_json::from_str(r#"{ "queue": "audit", "bindings": ["orders", "refunds"] }"#).unwrap();
/// assert_eq!(config.queue.as_deref(), Some("audit"));
/// assert_eq!(config.bindings.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SubscriptionConfig {
    /// Durable queue to consume. `None` (or empty) declares a transient,
    /// broker-named queue consumed exclusively.
    #[serde(default)]
    pub queue: Option<String>,

    /// Exchanges to declare as fanout and bind the queue to, in order.
    #[serde(default)]
    pub bindings: Vec<String>,
}

/// End-of-life report posted once per subscription.
#[derive(Clone)]
pub struct SubscriptionClosed {
    /// Deliveries received from the broker.
    pub delivery_count: u64,
    /// Tag of the most recently forwarded delivery, 0 if none.
    pub latest_delivery_tag: u64,
    /// Channel the deliveries arrived on.
    pub latest_consumer: ChannelPtr,
}

impl fmt::Debug for SubscriptionClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionClosed")
            .field("delivery_count", &self.delivery_count)
            .field("latest_delivery_tag", &self.latest_delivery_tag)
            .field("latest_consumer", &self.latest_consumer.id())
            .finish()
    }
}

/// Result of declaring and binding one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingOutcome {
    pub exchange: String,
    pub declare: Result<()>,
    pub bind: Result<()>,
}

impl BindingOutcome {
    pub fn is_ok(&self) -> bool {
        self.declare.is_ok() && self.bind.is_ok()
    }
}

/// Lifecycle position of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Configuring,
    Consuming,
    Draining,
    Closed,
}

/// Consumes one queue and streams its deliveries to an output sink.
pub struct Subscription {
    channel: ChannelPtr,
    queue: Option<String>,
    consumer: String,
    bindings: Vec<String>,
    output: mpsc::Sender<Delivery>,
    control: mpsc::Sender<SubscriptionClosed>,
    state: Mutex<SubscriptionState>,
}

impl Subscription {
    /// Create a subscription on `channel` using the system clock for the
    /// consumer name.
    pub fn new(
        channel: ChannelPtr,
        config: SubscriptionConfig,
        output: mpsc::Sender<Delivery>,
        control: mpsc::Sender<SubscriptionClosed>,
    ) -> Self {
        // ---
        Self::builder(channel, output, control).config(config).build()
    }

    pub fn builder(
        channel: ChannelPtr,
        output: mpsc::Sender<Delivery>,
        control: mpsc::Sender<SubscriptionClosed>,
    ) -> SubscriptionBuilder {
        SubscriptionBuilder {
            channel,
            output,
            control,
            config: SubscriptionConfig::default(),
            clock: system_clock(),
        }
    }

    /// Name the consumer is registered under on the broker.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn state(&self) -> SubscriptionState {
        *lock_ignore_poison(&self.state)
    }

    /// Run the subscription to completion.
    ///
    /// Returns once the broker ends the delivery stream, after the closure
    /// summary has been posted. A setup failure still posts a zero summary
    /// and is then returned as [`Error::Setup`].
    ///
    /// A subscription runs once. Calling `listen` again, or concurrently,
    /// fails with [`Error::Setup`] without touching the channel or posting
    /// another summary.
    pub async fn listen(&self) -> Result<()> {
        // ---
        {
            let mut state = lock_ignore_poison(&self.state);
            if *state != SubscriptionState::Created {
                log_warn!("subscription {} already started ({:?})", self.consumer, *state);
                return Err(Error::Setup(format!(
                    "subscription {} already started",
                    self.consumer
                )));
            }
            *state = SubscriptionState::Configuring;
        }

        log_info!("subscription {} starting", self.consumer);

        let (delivery_count, latest_delivery_tag, outcome) = match self.open().await {
            Ok(stream) => {
                let (count, latest) = self.drain(stream).await;
                (count, latest, Ok(()))
            }
            Err(err) => (0, 0, Err(err)),
        };

        self.transition(SubscriptionState::Closed);
        let summary = SubscriptionClosed {
            delivery_count,
            latest_delivery_tag,
            latest_consumer: self.channel.clone(),
        };
        if self.control.send(summary).await.is_err() {
            log_warn!("subscription {}: control sink closed", self.consumer);
        }

        log_info!(
            "subscription {} closed after {delivery_count} deliveries (latest tag {latest_delivery_tag})",
            self.consumer
        );
        outcome
    }

    /// Ask the broker to cancel this subscription's consumer.
    ///
    /// `listen` returns once the broker reacts by ending the stream.
    pub async fn close(&self) -> Result<()> {
        // ---
        log_debug!("subscription {}: cancelling consumer", self.consumer);
        self.channel.cancel_consumer(&self.consumer).await
    }

    async fn open(&self) -> Result<DeliveryStream> {
        // ---
        let prefetch = u16::try_from(self.output.max_capacity()).unwrap_or(u16::MAX);
        if let Err(_err) = self.channel.configure_buffer(prefetch).await {
            log_warn!("unable to set prefetch {prefetch}: {_err}");
        }

        let queue = self.declare_queue().await?;
        self.bind(&queue).await;

        self.transition(SubscriptionState::Consuming);
        let mode = match self.queue {
            Some(_) => ConsumeMode::SHARED,
            None => ConsumeMode::EXCLUSIVE,
        };

        self.channel
            .consume(&queue, &self.consumer, mode)
            .await
            .map_err(|err| {
                log_error!("unable to consume queue [{queue}]: {err}");
                Error::Setup(format!("consume [{queue}]: {err}"))
            })
    }

    async fn declare_queue(&self) -> Result<String> {
        // ---
        let declared = match &self.queue {
            Some(name) => self
                .channel
                .declare_queue(name)
                .await
                .map(|_| name.clone()),
            None => self.channel.declare_transient_queue().await,
        };

        declared.map_err(|err| {
            let name = self.queue.as_deref().unwrap_or("<transient>");
            log_error!("unable to declare queue [{name}]: {err}");
            Error::Setup(format!("declare queue [{name}]: {err}"))
        })
    }

    /// Declare and bind every exchange, in order, without stopping at a
    /// failure.
    pub(crate) async fn bind(&self, queue: &str) -> Vec<BindingOutcome> {
        // ---
        let mut outcomes = Vec::with_capacity(self.bindings.len());

        for exchange in &self.bindings {
            let declare = self
                .channel
                .declare_exchange(exchange, ExchangeKind::Fanout)
                .await;
            if let Err(_err) = &declare {
                log_error!("unable to create [fanout] exchange [{exchange}]: {_err}");
            }

            let bind = self.channel.bind_exchange_to_queue(queue, exchange).await;
            if let Err(_err) = &bind {
                log_error!("unable to bind exchange [{exchange}] to queue [{queue}]: {_err}");
            }

            outcomes.push(BindingOutcome {
                exchange: exchange.clone(),
                declare,
                bind,
            });
        }

        outcomes
    }

    async fn drain(&self, mut stream: DeliveryStream) -> (u64, u64) {
        // ---
        self.transition(SubscriptionState::Draining);

        let mut delivery_count = 0;
        let mut latest_tag = 0;

        while let Some(raw) = stream.recv().await {
            delivery_count += 1;
            latest_tag = raw.delivery_tag;

            let delivery = from_raw(raw, self.channel.clone());
            if self.output.send(delivery).await.is_err() {
                log_warn!(
                    "subscription {}: output sink closed, dropping delivery {latest_tag}",
                    self.consumer
                );
            }
        }

        (delivery_count, latest_tag)
    }

    fn transition(&self, next: SubscriptionState) {
        *lock_ignore_poison(&self.state) = next;
    }
}

/// Builder for [`Subscription`].
pub struct SubscriptionBuilder {
    channel: ChannelPtr,
    output: mpsc::Sender<Delivery>,
    control: mpsc::Sender<SubscriptionClosed>,
    config: SubscriptionConfig,
    clock: ClockPtr,
}

impl SubscriptionBuilder {
    pub fn config(mut self, config: SubscriptionConfig) -> Self {
        self.config = config;
        self
    }

    /// Consume the durable queue `name` instead of a transient one.
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.config.queue = Some(name.into());
        self
    }

    /// Add a fanout exchange to bind the queue to.
    pub fn bind(mut self, exchange: impl Into<String>) -> Self {
        self.config.bindings.push(exchange.into());
        self
    }

    /// Clock used to derive the consumer name.
    pub fn clock(mut self, clock: ClockPtr) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Subscription {
        // ---
        let SubscriptionConfig { queue, bindings } = self.config;

        Subscription {
            channel: self.channel,
            queue: queue.filter(|name| !name.is_empty()),
            consumer: consumer_name(self.clock.now()),
            bindings,
            output: self.output,
            control: self.control,
            state: Mutex::new(SubscriptionState::Created),
        }
    }
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
