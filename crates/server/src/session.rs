//! Per-connection session state.
//!
//! A session owns the views created over its connection; its
//! subscriptions live in the callback registry, keyed by session id.
//! It also owns the outbound half of the connection: all responses and
//! pushes funnel through a single channel so that a text announcement
//! and its binary chunks are never interleaved with another message's
//! frames.

use colonnade_protocol::{FrameEncoder, Message, WireError};
use colonnade_transport::Frame;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::error::Error;

/// One connected client.
pub struct Session {
    session_id: Uuid,
    outbound: mpsc::UnboundedSender<Vec<Frame>>,
    encoder: FrameEncoder,
    owned_views: Mutex<HashSet<String>>,
}

impl Session {
    /// Create a session writing to the given outbound channel.
    ///
    /// Each channel item is the complete frame sequence for one logical
    /// message; the writer task must send each sequence contiguously.
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Vec<Frame>>, chunk_size: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            outbound,
            encoder: FrameEncoder::new(chunk_size),
            owned_views: Mutex::new(HashSet::new()),
        }
    }

    /// The session's unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    /// Encode and queue a response.
    ///
    /// An encoding failure is turned into an error response with the
    /// same request id, so the client's pending request still resolves.
    pub fn send_response(&self, message: Message) {
        let id = message.id;
        let frames = match self.encoder.encode(message) {
            Ok(frames) => frames,
            Err(e) => {
                let error = Message::error_response(
                    id,
                    WireError::new(Error::Serialization(e.to_string()).code(), e.to_string()),
                );
                match self.encoder.encode(error) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(session_id = %self.session_id, error = %e, "dropping unencodable error response");
                        return;
                    }
                }
            }
        };
        self.enqueue(frames);
    }

    /// Encode and queue a subscription push.
    ///
    /// Pushes are fire-and-forget; an encoding failure is logged and
    /// the push dropped rather than surfaced to the client.
    pub fn send_push(&self, message: Message) {
        match self.encoder.encode(message) {
            Ok(frames) => self.enqueue(frames),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "dropping unencodable push");
            }
        }
    }

    /// Queue raw frames, e.g. a heartbeat reply.
    pub fn enqueue(&self, frames: Vec<Frame>) {
        // A closed channel means the writer task is gone and the
        // connection is being torn down; nothing left to deliver to.
        let _ = self.outbound.send(frames);
    }

    /// Record a view created over this connection.
    pub fn track_view(&self, name: &str) {
        self.owned_views.lock().insert(name.to_string());
    }

    /// Forget a view after it is deleted.
    pub fn untrack_view(&self, name: &str) {
        self.owned_views.lock().remove(name);
    }

    /// Views created over this connection.
    #[must_use]
    pub fn owned_views(&self) -> Vec<String> {
        self.owned_views.lock().iter().cloned().collect()
    }
}
