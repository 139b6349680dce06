//! Outbound writers.
//!
//! Two variants share the same contract and the same lazy channel
//! acquisition:
//!
//! - [`ChannelWriter`] publishes each dispatch immediately. A failed
//!   publish discards the channel so the next write opens a fresh one.
//! - [`TransactionWriter`] publishes inside a broker transaction that only
//!   takes effect on [`Writer::commit`].
//!
//! Neither variant retries. Retry and backoff belong to the controller;
//! writers only decide when a broken channel must be dropped.

mod channel_writer;
mod slot;
mod transaction_writer;

use std::sync::Arc;

pub use channel_writer::ChannelWriter;
pub use transaction_writer::TransactionWriter;

use crate::{Dispatch, Result};

/// Publishes dispatches through a lazily acquired broker channel.
///
/// Writers are `Send + Sync`; one instance may be shared between tasks.
#[async_trait::async_trait]
pub trait Writer: Send + Sync {
    // ---
    /// Publish `dispatch`, acquiring a channel first if none is held.
    ///
    /// Fails with [`Error::WriterClosed`](crate::Error::WriterClosed) when no
    /// channel can be acquired.
    async fn write(&self, dispatch: &Dispatch) -> Result<()>;

    /// Make every write since the previous commit take effect.
    async fn commit(&self) -> Result<()>;

    /// Stop acquiring channels. Writes already in flight are not interrupted.
    async fn close(&self);
}

/// Shared writer pointer.
pub type WriterPtr = Arc<dyn Writer>;
