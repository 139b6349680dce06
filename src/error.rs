use thiserror::Error;

/// Errors that can occur while publishing or consuming through a broker channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No channel could be acquired; the writer was closed or the
    /// controller declined to open one.
    #[error("writer closed")]
    WriterClosed,

    /// The channel rejected a publish
    #[error("publish failed: {0}")]
    Publish(String),

    /// The channel failed to commit the open transaction
    #[error("commit failed: {0}")]
    Commit(String),

    /// The channel failed to roll back the open transaction
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Queue declaration or consumer start failed during subscription setup
    #[error("subscription setup failed: {0}")]
    Setup(String),

    /// Any other channel-level protocol failure (qos, declare, bind, ack, cancel, close)
    #[error("channel error: {0}")]
    Channel(String),

    /// Operation attempted on a channel that has already been closed
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type alias for publish/subscribe operations
pub type Result<T> = std::result::Result<T, Error>;
