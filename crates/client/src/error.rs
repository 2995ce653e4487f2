//! Client error taxonomy.

use colonnade_protocol::{ProtocolError, WireError};
use colonnade_transport::TransportError;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the client API.
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with an error response.
    #[error("server error: {0}")]
    Remote(WireError),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The client was shut down before the request completed.
    #[error("client closed")]
    ChannelClosed,

    /// The server closed the connection before the request completed.
    #[error("connection lost")]
    ConnectionLost,

    /// The response did not have the shape the typed handle expected.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
