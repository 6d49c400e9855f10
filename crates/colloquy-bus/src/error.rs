/// Errors produced by the fan-out bus and its handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The bus has been shut down and accepts no new subscriptions.
    #[error("bus is shut down")]
    Shutdown,

    /// A channel subscriber went away.
    #[error("subscriber channel closed")]
    ChannelClosed,

    /// A handler reported a failure while processing a message.
    #[error("handler failed: {0}")]
    Handler(String),
}

/// Convenience alias used throughout the bus crate.
pub type BusResult<T> = std::result::Result<T, BusError>;
