//! Colonnade server: registry, command router, and session lifecycle.
//!
//! The server owns named engine tables and views and exposes them to
//! remote clients over any [`colonnade_transport::Transport`]. Each
//! accepted connection gets a [`Session`] that tracks the views and
//! subscriptions it creates, so disconnects clean up after themselves.
//! Decoded messages run through the [`Router`], which dispatches them
//! against closed per-object method tables and converts every failure
//! into an error response; a request can fail while the connection survives.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod error;
pub mod methods;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use callbacks::{CallbackKind, CallbackRegistration, CallbackRegistry};
pub use error::{Error, Result};
pub use methods::{MethodArgs, TableMethod, ViewMethod};
pub use registry::Registry;
pub use router::Router;
pub use server::{Server, ServerConfig, ServerHandle};
pub use session::Session;
