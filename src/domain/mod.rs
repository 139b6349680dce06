//! Domain layer public interface.
//!
//! This module defines the abstractions shared by writers, subscriptions
//! and channel implementations. They are independent of any concrete
//! broker client library.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod channel;
mod message;

// --- Channel domain re-exports ---

pub use channel::{
    //
    ActiveProbe,
    BrokerChannel,
    ChannelPtr,
    ConsumeMode,
    Controller,
    ControllerPtr,
    DeliveryStream,
    ExchangeKind,
    MessageProperties,
    OutboundMessage,
    RawDelivery,
};

// --- Message domain re-exports ---

pub use message::{
    //
    Acknowledger,
    Delivery,
    Dispatch,
    Headers,
};
