//! Resilient publish/subscribe over AMQP-style broker channels
//!
//! This library provides writers that publish [`Dispatch`] envelopes and
//! subscriptions that consume [`Delivery`] envelopes. Broker channels are
//! acquired lazily and replaced after failures, so a single writer survives
//! any number of broken channels without the caller reconnecting.
//!
//! - [`ChannelWriter`] publishes each dispatch on its own.
//! - [`TransactionWriter`] batches dispatches until [`Writer::commit`].
//! - [`Subscription`] declares a queue, binds it to exchanges and forwards
//!   deliveries until the broker ends the consumer, then reports a
//!   [`SubscriptionClosed`] summary.
//!
//! Brokers are plugged in through the [`Controller`] and [`BrokerChannel`]
//! traits. [`MemoryBroker`] is always available; the `transport_lapin`
//! feature adds an AMQP 0-9-1 implementation.
//!

// Import all sub modules once...
mod clock;
mod destination;
mod domain;
mod envelope;
mod macros;
mod subscription;
mod transport;
mod writer;

mod error;

#[cfg(test)]
mod testing;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use writer::{ChannelWriter, TransactionWriter, Writer, WriterPtr};

pub use subscription::{
    //
    BindingOutcome,
    Subscription,
    SubscriptionBuilder,
    SubscriptionClosed,
    SubscriptionConfig,
    SubscriptionState,
};

pub use clock::{Clock, ClockPtr, FixedClock, SystemClock};
pub use destination::{resolve_route, Route, ROUTING_KEY_MARKER};
pub use error::{Error, Result};

pub use transport::{MemoryBroker, MemoryChannel};

#[cfg(feature = "transport_lapin")]
pub use transport::{create_lapin_controller, AmqpConfig, LapinChannel, LapinController};

// --- public re-exports
pub use domain::{
    //
    Acknowledger,
    ActiveProbe,
    BrokerChannel,
    ChannelPtr,
    ConsumeMode,
    Controller,
    ControllerPtr,
    Delivery,
    DeliveryStream,
    Dispatch,
    ExchangeKind,
    Headers,
    MessageProperties,
    OutboundMessage,
    RawDelivery,
};
