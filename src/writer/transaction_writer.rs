//! Transactional writer.

use crate::clock::{system_clock, ClockPtr};
use crate::domain::ControllerPtr;
use crate::envelope::to_outbound;
use crate::writer::slot::{ChannelMode, ChannelSlot};
use crate::{log_warn, Dispatch, Error, Result, Writer};

/// Writer that batches publishes in a broker transaction.
///
/// Every channel it acquires is switched to transactional mode before the
/// first publish. Nothing written reaches consumers until
/// [`commit`](Writer::commit) succeeds.
///
/// A failed publish is returned to the caller but keeps the channel, so the
/// next commit or rollback still targets the same transaction. The broker
/// state of that transaction is undefined until then. A failed commit or
/// rollback discards the channel.
///
/// A channel that refuses transactional mode is closed straight away and
/// never cached. The write that triggered the acquisition fails with the
/// channel's own error rather than [`Error::WriterClosed`], and the next
/// write asks the controller for another channel.
pub struct TransactionWriter {
    slot: ChannelSlot,
    clock: ClockPtr,
}

impl TransactionWriter {
    pub fn new(controller: ControllerPtr) -> Self {
        // ---
        Self {
            slot: ChannelSlot::new(controller, ChannelMode::Transactional),
            clock: system_clock(),
        }
    }

    /// Use `clock` to stamp dispatches that carry no timestamp.
    pub fn with_clock(mut self, clock: ClockPtr) -> Self {
        self.clock = clock;
        self
    }

    /// Abandon every write since the previous commit.
    ///
    /// Does nothing when no channel is held.
    pub async fn rollback(&self) -> Result<()> {
        // ---
        let Some(channel) = self.slot.current() else {
            return Ok(());
        };

        let Err(err) = channel.rollback_transaction().await else {
            return Ok(());
        };

        log_warn!("transaction rollback failed, closing channel: {err}");
        self.slot.discard(&channel).await;
        Err(err)
    }
}

#[async_trait::async_trait]
impl Writer for TransactionWriter {
    async fn write(&self, dispatch: &Dispatch) -> Result<()> {
        // ---
        let channel = self.slot.ensure().await?;

        // TODO: refuse further publishes after a failed one until the
        // transaction is settled by commit or rollback.
        let message = to_outbound(dispatch, self.clock.now());
        channel
            .publish(&dispatch.destination, &dispatch.partition, message)
            .await
    }

    async fn commit(&self) -> Result<()> {
        // ---
        let Some(channel) = self.slot.current() else {
            return Ok(());
        };

        let Err(err) = channel.commit_transaction().await else {
            return Ok(());
        };

        log_warn!("transaction failed, closing channel: {err}");
        self.slot.discard(&channel).await;
        Err(match err {
            Error::Commit(_) => err,
            other => Error::Commit(other.to_string()),
        })
    }

    async fn close(&self) {
        self.slot.close().await;
    }
}
