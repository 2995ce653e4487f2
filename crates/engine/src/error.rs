//! Engine error types.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Domain errors raised by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The supplied schema or initial data could not produce a table.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A view configuration referenced something the table lacks.
    #[error("Invalid column: {0}")]
    InvalidColumn(String),

    /// An update or remove payload did not match the table.
    #[error("Bad mutation payload: {0}")]
    BadMutation(String),

    /// The target object was already deleted.
    #[error("Object deleted")]
    Deleted,

    /// Any other engine-specific failure.
    #[error("{0}")]
    Other(String),
}
