//! Error types for transport implementations.

use thiserror::Error;

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The address could not be parsed or resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection was closed by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send a frame.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other transport-specific error.
    #[error("Transport error: {0}")]
    Other(String),
}
