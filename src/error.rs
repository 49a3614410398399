//! Crate-wide error types
//!
//! One error enum covers the failure taxonomy shared by the control and
//! video paths. Nothing here is retried automatically; callers re-issue
//! the original operation if they want another attempt.

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay operations
#[derive(Debug, Error)]
pub enum Error {
    /// No live control channel exists for the provider; the command was
    /// logged and dropped.
    #[error("no live control channel for provider {0}")]
    ChannelUnavailable(i64),

    /// The control channel died while a request was in flight.
    #[error("control channel torn down before a response arrived")]
    ChannelDead,

    /// Writing a command to the provider socket failed.
    #[error("failed to send on provider socket: {0}")]
    SendFailure(String),

    /// An inbound payload could not be decoded.
    #[error("malformed inbound payload: {0}")]
    DecodeFailure(#[from] serde_json::Error),

    /// A response referenced a correlation id with no pending entry.
    #[error("response references unknown correlation id {0}")]
    UnknownCorrelationId(u16),

    /// Read/write failure on a control or video socket.
    #[error("socket gone: {0}")]
    SocketGone(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
