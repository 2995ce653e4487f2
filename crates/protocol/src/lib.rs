//! Wire protocol for colonnade sessions.
//!
//! This crate defines the unit of exchange between a colonnade client and
//! server: the JSON text [`Message`], the closed [`EngineValue`] union used
//! for arguments and payloads, and the chunked-binary framing discipline
//! that carries columnar buffers alongside control messages on the same
//! channel.
//!
//! # Framing
//!
//! A logical message travels as one text frame, optionally followed by one
//! or more binary frames. A message carrying a binary payload announces it
//! by setting `binary_length`; the receiver concatenates subsequent binary
//! frames until the announced length is reached and reattaches the buffer
//! to the message. Announcements complete strictly in FIFO order.
//!
//! The reserved literal frames `"ping"` and `"pong"` are heartbeats and are
//! never JSON-decoded.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod framing;
pub mod message;
pub mod value;

pub use error::{ProtocolError, Result};
pub use framing::{Decoded, FrameDecoder, FrameEncoder, PING, PONG};
pub use message::{Command, INIT_ID, Message, WireError};
pub use value::EngineValue;
