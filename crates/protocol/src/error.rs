//! Protocol-level error types.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised by the framing layer.
///
/// Framing errors are the only error class that should close a connection:
/// once the chunked-binary state is out of sync, subsequent frames cannot
/// be trusted. Request-level failures are reported as error responses and
/// never surface here.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A binary frame arrived with no pending announcement.
    #[error("binary frame received with no pending announcement")]
    UnexpectedBinary,

    /// More binary bytes arrived than the outstanding announcements cover.
    #[error("binary length mismatch: announced {expected} bytes, received {actual}")]
    LengthMismatch {
        /// Total bytes announced and not yet consumed.
        expected: usize,
        /// Bytes actually accumulated.
        actual: usize,
    },

    /// An announced binary payload exceeds the configured maximum.
    #[error("announced binary of {size} bytes exceeds maximum {max}")]
    BinaryTooLarge {
        /// Announced payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A text frame could not be decoded as a message.
    #[error("malformed text frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// A message could not be encoded to a text frame.
    ///
    /// Raised for values the wire format cannot represent, such as
    /// non-finite floats or a binary buffer the encoder failed to extract.
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),
}
