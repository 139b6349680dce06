//! Injectable time source.
//!
//! Writers stamp outbound messages with the clock's time and subscriptions
//! derive their consumer names from it. Tests supply a [`FixedClock`] to get
//! deterministic timestamps and consumer names.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Shared clock pointer.
pub type ClockPtr = Arc<dyn Clock>;

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub SystemTime);

impl Clock for FixedClock {
    fn now(&self) -> SystemTime {
        self.0
    }
}

pub(crate) fn system_clock() -> ClockPtr {
    Arc::new(SystemClock)
}

/// Consumer name derived from `now`: nanoseconds since the Unix epoch in
/// decimal, so restarts never collide with a previous consumer.
pub(crate) fn consumer_name(now: SystemTime) -> String {
    // ---
    let nanos = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    nanos.to_string()
}
