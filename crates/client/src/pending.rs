//! Pending-completion bookkeeping.

use colonnade_protocol::EngineValue;
use tokio::sync::{mpsc, oneshot};

use crate::error::Error;

/// A completion waiting on an inbound message with a matching id.
///
/// `Once` entries resolve a single response and are removed on delivery.
/// `Subscription` entries are keep-alive: every push with the subscribing
/// request's id is forwarded down the stream and the entry stays until the
/// caller unsubscribes or the connection ends.
pub(crate) enum Pending {
    Once(oneshot::Sender<Result<EngineValue, Error>>),
    Subscription(mpsc::UnboundedSender<EngineValue>),
}
