//! Lazy channel acquisition shared by both writer variants.
//!
//! The held handle lives in a small `Mutex<Option<ChannelPtr>>` that is
//! only ever locked long enough to clone or swap the `Arc`. Opening a new
//! channel happens under a separate async lock which also guards the
//! writer's active flag, so at most one channel is opened per gap no
//! matter how many tasks write concurrently.
//!
//! Steady-state publishing never waits on the acquisition lock. A handle
//! read on the fast path may be discarded by another task a moment later;
//! the caller then gets a publish error and the next write re-acquires.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{ActiveProbe, ChannelPtr, ControllerPtr};
use crate::{log_debug, log_error, log_info, log_warn, Error, Result};

/// How a freshly opened channel is prepared before first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelMode {
    Plain,
    Transactional,
}

/// State guarded by the acquisition lock.
struct WriterState {
    closed: bool,
}

impl ActiveProbe for WriterState {
    // Called by the controller while the acquisition lock is held.
    fn is_active(&self) -> bool {
        !self.closed
    }
}

pub(crate) struct ChannelSlot {
    controller: ControllerPtr,
    mode: ChannelMode,
    current: Mutex<Option<ChannelPtr>>,
    state: tokio::sync::Mutex<WriterState>,
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn same_channel(a: &ChannelPtr, b: &ChannelPtr) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ChannelSlot {
    pub(crate) fn new(controller: ControllerPtr, mode: ChannelMode) -> Self {
        // ---
        Self {
            controller,
            mode,
            current: Mutex::new(None),
            state: tokio::sync::Mutex::new(WriterState { closed: false }),
        }
    }

    /// The held handle, if any, without touching the acquisition lock.
    pub(crate) fn current(&self) -> Option<ChannelPtr> {
        lock_ignore_poison(&self.current).clone()
    }

    /// Return the held handle, opening one through the controller if none
    /// is held.
    ///
    /// Fails with [`Error::WriterClosed`] when the controller declines.
    pub(crate) async fn ensure(&self) -> Result<ChannelPtr> {
        // ---
        if let Some(channel) = self.current() {
            return Ok(channel);
        }

        let state = self.state.lock().await;

        // Another task may have filled the gap while we waited.
        if let Some(channel) = self.current() {
            return Ok(channel);
        }

        let Some(channel) = self.controller.open_channel(&*state).await else {
            log_info!("no channel granted; closed={}", state.closed);
            return Err(Error::WriterClosed);
        };

        if self.mode == ChannelMode::Transactional {
            if let Err(err) = channel.configure_transactional().await {
                log_error!("channel {} rejected transactional mode: {err}", channel.id());
                let _ = channel.close().await;
                return Err(err);
            }
        }

        log_debug!("acquired channel {} ({:?})", channel.id(), self.mode);
        *lock_ignore_poison(&self.current) = Some(channel.clone());
        Ok(channel)
    }

    /// Close `failed` and forget it so the next [`ensure`](Self::ensure)
    /// opens a fresh channel. A newer handle already installed by another
    /// task is left alone.
    pub(crate) async fn discard(&self, failed: &ChannelPtr) {
        // ---
        {
            let _state = self.state.lock().await;
            let mut current = lock_ignore_poison(&self.current);
            if current.as_ref().is_some_and(|held| same_channel(held, failed)) {
                *current = None;
            }
        }

        log_warn!("discarding channel {}", failed.id());
        if let Err(_err) = failed.close().await {
            log_debug!("closing discarded channel {} failed: {_err}", failed.id());
        }
    }

    /// Mark the writer inactive and release the held handle.
    ///
    /// Operations already running against the handle are not interrupted.
    /// The released channel is closed right away only when nothing else
    /// still references it.
    pub(crate) async fn close(&self) {
        // ---
        let released = {
            let mut state = self.state.lock().await;
            state.closed = true;
            lock_ignore_poison(&self.current).take()
        };

        let Some(channel) = released else {
            return;
        };

        if Arc::strong_count(&channel) > 1 {
            log_debug!("writer closed; channel {} still in use", channel.id());
            return;
        }

        log_debug!("writer closed; closing channel {}", channel.id());
        if let Err(_err) = channel.close().await {
            log_debug!("closing released channel {} failed: {_err}", channel.id());
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::MemoryBroker;

    #[tokio::test]
    async fn close_leaves_in_flight_channel_open_until_released() {
        // ---
        let broker = MemoryBroker::new();
        let slot = ChannelSlot::new(Arc::new(broker.clone()), ChannelMode::Plain);
        let in_flight = slot.ensure().await.expect("no channel");

        slot.close().await;

        assert!(slot.current().is_none());
        assert_eq!(slot.ensure().await.err(), Some(Error::WriterClosed));
        assert_eq!(broker.open_channels(), 1, "in-flight channel closed early");

        drop(in_flight);
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn close_without_other_users_closes_channel() {
        // ---
        let broker = MemoryBroker::new();
        let slot = ChannelSlot::new(Arc::new(broker.clone()), ChannelMode::Transactional);
        drop(slot.ensure().await.expect("no channel"));
        assert_eq!(broker.open_channels(), 1);

        slot.close().await;

        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn discard_ignores_a_handle_no_longer_held() {
        // ---
        let broker = MemoryBroker::new();
        let slot = ChannelSlot::new(Arc::new(broker.clone()), ChannelMode::Plain);
        let stale = slot.ensure().await.expect("no channel");
        slot.discard(&stale).await;
        let fresh = slot.ensure().await.expect("no channel");

        slot.discard(&stale).await;

        let held = slot.current().expect("fresh channel was dropped");
        assert_eq!(held.id(), fresh.id());
        assert_ne!(held.id(), stale.id());
    }
}
