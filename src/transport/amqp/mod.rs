//! AMQP protocol transports.
//!
//! This module contains channel and controller implementations for
//! AMQP-based brokers. Currently supports:
//! - lapin - AMQP 0-9-1 (RabbitMQ)

#[cfg(feature = "transport_lapin")]
mod lapin;

#[cfg(feature = "transport_lapin")]
pub use lapin::{create_controller as create_lapin_controller, AmqpConfig, LapinChannel, LapinController};
