//! Destination addressing.
//!
//! A destination normally names an exchange and the dispatch partition is
//! used as the routing key. A destination starting with `@` instead names a
//! routing key on the default exchange: `"@billing"` publishes to exchange
//! `""` with routing key `"billing"`, whatever partition was supplied.

use crate::log_debug;

/// Marker prefix selecting routing-key addressing.
pub const ROUTING_KEY_MARKER: char = '@';

/// Where a publish goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub exchange: &'a str,
    pub routing_key: &'a str,
}

/// Resolve a dispatch destination and partition into an exchange and
/// routing key.
///
/// # Example
///
/// ```
/// # use mom_pubsub::resolve_route;
/// let route = resolve_route("@billing", "ignored");
/// assert_eq!(route.exchange, "");
/// assert_eq!(route.routing_key, "billing");
///
/// let route = resolve_route("orders", "eu-west");
/// assert_eq!(route.exchange, "orders");
/// assert_eq!(route.routing_key, "eu-west");
/// ```
pub fn resolve_route<'a>(destination: &'a str, partition: &'a str) -> Route<'a> {
    // ---
    match destination.strip_prefix(ROUTING_KEY_MARKER) {
        Some(routing_key) if !routing_key.is_empty() => {
            log_debug!("routing message with routing key [{destination}]");
            Route {
                exchange: "",
                routing_key,
            }
        }
        // A bare "@" carries no key of its own; fall back to the partition.
        Some(_) => Route {
            exchange: "",
            routing_key: partition,
        },
        None => Route {
            exchange: destination,
            routing_key: partition,
        },
    }
}
