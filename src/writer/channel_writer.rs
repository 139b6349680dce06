//! Fire-and-forget writer.

use crate::clock::{system_clock, ClockPtr};
use crate::domain::ControllerPtr;
use crate::envelope::to_outbound;
use crate::writer::slot::{ChannelMode, ChannelSlot};
use crate::{log_warn, Dispatch, Result, Writer};

/// Writer that publishes every dispatch immediately.
///
/// On a publish failure the channel is closed and dropped, and the error is
/// returned to the caller. The failed dispatch is not retried; the next
/// `write` acquires a new channel.
pub struct ChannelWriter {
    slot: ChannelSlot,
    clock: ClockPtr,
}

impl ChannelWriter {
    pub fn new(controller: ControllerPtr) -> Self {
        // ---
        Self {
            slot: ChannelSlot::new(controller, ChannelMode::Plain),
            clock: system_clock(),
        }
    }

    /// Use `clock` to stamp dispatches that carry no timestamp.
    pub fn with_clock(mut self, clock: ClockPtr) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait::async_trait]
impl Writer for ChannelWriter {
    async fn write(&self, dispatch: &Dispatch) -> Result<()> {
        // ---
        let channel = self.slot.ensure().await?;

        let message = to_outbound(dispatch, self.clock.now());
        let result = channel
            .publish(&dispatch.destination, &dispatch.partition, message)
            .await;

        if let Err(err) = &result {
            log_warn!("publish to [{}] failed: {err}", dispatch.destination);
            self.slot.discard(&channel).await;
        }
        result
    }

    /// Always succeeds; every publish is final as soon as it is written.
    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.slot.close().await;
    }
}
