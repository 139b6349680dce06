//! Broker implementations.
//!
//! This module provides concrete implementations of the domain-level
//! [`Controller`](crate::Controller) and [`BrokerChannel`](crate::BrokerChannel)
//! traits. Network transports are hidden behind feature flags.
//!
//! Domain code must not depend on transport-specific types.

mod memory;

#[cfg(feature = "transport_lapin")]
mod amqp;

pub use memory::{MemoryBroker, MemoryChannel};

#[cfg(feature = "transport_lapin")]
pub use amqp::{create_lapin_controller, AmqpConfig, LapinChannel, LapinController};
