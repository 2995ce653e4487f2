//! Generic duplex transport abstraction for the colonnade protocol
//!
//! This crate provides a transport-agnostic interface over a bidirectional
//! frame-oriented channel. Specific transport implementations (WebSocket,
//! in-memory, etc.) are provided in separate crates.
//!
//! Transports carry two kinds of frames: text frames (control messages and
//! announcements) and binary frames (raw payload chunks). Frame semantics
//! are defined by `colonnade-protocol`; this layer only moves them.

pub mod error;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;

pub use error::TransportError;

/// A single transport frame.
///
/// Text frames carry JSON control messages (or the reserved heartbeat
/// literals); binary frames carry raw payload chunks belonging to the most
/// recently announced binary transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame.
    Text(String),
    /// A raw binary frame.
    Binary(Bytes),
}

impl Frame {
    /// Length of the frame payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the frame payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport trait for establishing duplex frame channels.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to a peer at the given address.
    async fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Start listening at the given address.
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError>;
}

/// A listening endpoint that accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept the next inbound connection.
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Stop listening and release the endpoint.
    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// An established duplex connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a frame to the peer.
    ///
    /// Frames are delivered in the order they are sent; a text announcement
    /// and its binary chunks are never reordered relative to each other.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Receive the next frame, or `None` once the peer has closed.
    async fn recv(&self) -> Option<Frame>;

    /// Close the connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Configuration shared by transports and the framing layer above them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of a single logical binary payload in bytes.
    pub max_binary_size: usize,
    /// Chunk size used when splitting a binary payload across frames.
    pub chunk_size: usize,
    /// Interval between client heartbeat pings.
    pub heartbeat_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_binary_size: 256 * 1024 * 1024, // 256MB
            chunk_size: 16 * 1024 * 1024,       // 16MB
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}
