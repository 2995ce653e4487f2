//! Request-handling error taxonomy.

use colonnade_engine::EngineError;
use colonnade_protocol::{ProtocolError, WireError};
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while handling a single request.
///
/// Every variant except `Protocol` is caught at the router boundary and
/// converted into an error response carrying the request id; only framing
/// errors terminate the connection.
#[derive(Debug, Error)]
pub enum Error {
    /// The registry is locked and the command mutates state.
    #[error("registry is locked")]
    AccessDenied,

    /// No table or view is registered under the given name, or the method
    /// name is not in the target's method table.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation may not be performed remotely.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The engine rejected the call.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A response value could not be encoded for the wire.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A well-framed message is missing a required field or carries a
    /// field of the wrong shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Framing-level failure; the connection should close.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl Error {
    /// The wire code for this error class.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::NotFound(_) => "NotFound",
            Self::Forbidden(_) => "Forbidden",
            Self::Engine(_) => "EngineError",
            Self::Serialization(_) => "SerializationError",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::Protocol(_) => "ProtocolError",
        }
    }

    /// Convert into the error payload of an error response.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        WireError::new(self.code(), self.to_string())
    }
}
