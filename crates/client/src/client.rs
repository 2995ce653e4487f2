//! The multiplexing protocol client.

use colonnade_protocol::{
    Decoded, EngineValue, FrameDecoder, FrameEncoder, Message, PING, PONG,
};
use colonnade_transport::{Config, Connection, Frame, Transport};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::handles::{Subscription, TableHandle};
use crate::pending::Pending;

pub(crate) struct Shared {
    connection: Arc<dyn Connection>,
    outbound: mpsc::UnboundedSender<Vec<Frame>>,
    encoder: FrameEncoder,
    pending: DashMap<i64, Pending>,
    next_request_id: AtomicI64,
    next_callback_id: AtomicU32,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A connection to a colonnade server.
///
/// Cheap to clone; all clones share the connection and the pending-request
/// table. Requests from any number of tasks interleave freely: each gets a
/// fresh id and resolves when the matching response arrives.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    capabilities: EngineValue,
}

impl Client {
    /// Connect to `addr`, perform the handshake, and spawn the reader and
    /// heartbeat tasks.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot connect or the handshake does not
    /// complete.
    pub async fn connect<T: Transport>(
        transport: &T,
        addr: &str,
        config: Config,
    ) -> Result<Self> {
        let connection: Arc<dyn Connection> = Arc::from(transport.connect(addr).await?);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<Frame>>();

        let shared = Arc::new(Shared {
            connection: Arc::clone(&connection),
            outbound: outbound_tx,
            encoder: FrameEncoder::new(config.chunk_size),
            pending: DashMap::new(),
            next_request_id: AtomicI64::new(0),
            next_callback_id: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let writer_connection = Arc::clone(&connection);
        let writer = tokio::spawn(async move {
            while let Some(frames) = outbound_rx.recv().await {
                for frame in frames {
                    if writer_connection.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let max_binary_size = config.max_binary_size;
        let reader = tokio::spawn(async move {
            read_loop(reader_shared, max_binary_size).await;
        });

        let heartbeat_shared = Arc::clone(&shared);
        let heartbeat_interval = config.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if heartbeat_shared
                    .outbound
                    .send(vec![Frame::Text(PING.to_string())])
                    .is_err()
                {
                    return;
                }
            }
        });

        shared.tasks.lock().extend([writer, reader, heartbeat]);

        let mut client = Self {
            shared,
            capabilities: EngineValue::Null,
        };
        client.capabilities = client.request(Message::init()).await?;
        debug!(capabilities = ?client.capabilities, "handshake complete");
        Ok(client)
    }

    /// Capabilities the server announced during the handshake.
    #[must_use]
    pub fn server_capabilities(&self) -> &EngineValue {
        &self.capabilities
    }

    /// Create a table on the server, returning a handle bound to it.
    ///
    /// # Errors
    ///
    /// Fails if the server rejects the schema or the name is taken.
    pub async fn create_table(
        &self,
        name: impl Into<String>,
        data_or_schema: EngineValue,
        options: EngineValue,
    ) -> Result<TableHandle> {
        let id = self.next_request_id();
        let data = self
            .request(Message::create_table(id, name, data_or_schema, options))
            .await?;
        match data {
            EngineValue::Str(name) => Ok(TableHandle::new(self.clone(), name)),
            other => Err(Error::UnexpectedResponse(format!(
                "create_table did not echo a name: {other:?}"
            ))),
        }
    }

    /// Bind a handle to a table the server already hosts.
    #[must_use]
    pub fn table(&self, name: impl Into<String>) -> TableHandle {
        TableHandle::new(self.clone(), name.into())
    }

    /// Fail every pending request and close the connection.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        fail_all(&self.shared, || Error::ChannelClosed);
        let tasks: Vec<JoinHandle<()>> = self.shared.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        let _ = self.shared.connection.close().await;
    }

    pub(crate) fn next_request_id(&self) -> i64 {
        self.shared.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_callback_id(&self) -> u32 {
        self.shared.next_callback_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a request and await its single response.
    pub(crate) async fn request(&self, message: Message) -> Result<EngineValue> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::ChannelClosed);
        }
        let id = message.id;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, Pending::Once(tx));
        if let Err(e) = self.send(message) {
            self.shared.pending.remove(&id);
            return Err(e);
        }
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Send a subscribing request and return the push stream.
    ///
    /// The keep-alive entry is registered before the message leaves, so a
    /// push racing the registration cannot be dropped.
    pub(crate) fn open_subscription(&self, message: Message) -> Result<Subscription> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::ChannelClosed);
        }
        let request_id = message.id;
        let callback_id = message.callback_id.unwrap_or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .pending
            .insert(request_id, Pending::Subscription(tx));
        if let Err(e) = self.send(message) {
            self.shared.pending.remove(&request_id);
            return Err(e);
        }
        Ok(Subscription::new(request_id, callback_id, rx))
    }

    /// Drop a subscription's keep-alive entry after unsubscribing.
    pub(crate) fn drop_subscription(&self, request_id: i64) {
        self.shared.pending.remove(&request_id);
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    fn send(&self, message: Message) -> Result<()> {
        let frames = self.shared.encoder.encode(message)?;
        self.shared
            .outbound
            .send(frames)
            .map_err(|_| Error::ChannelClosed)
    }
}

async fn read_loop(shared: Arc<Shared>, max_binary_size: usize) {
    let mut decoder = FrameDecoder::new(max_binary_size);
    loop {
        let Some(frame) = shared.connection.recv().await else {
            fail_all(&shared, || Error::ConnectionLost);
            return;
        };
        match decoder.decode(frame) {
            Ok(Decoded::Complete(messages)) => {
                for message in messages {
                    dispatch(&shared, message);
                }
            }
            Ok(Decoded::Pong | Decoded::Incomplete) => {}
            Ok(Decoded::Ping) => {
                let _ = shared.outbound.send(vec![Frame::Text(PONG.to_string())]);
            }
            Err(e) => {
                error!(error = %e, "protocol error, closing connection");
                fail_all(&shared, || Error::ConnectionLost);
                let _ = shared.connection.close().await;
                return;
            }
        }
    }
}

/// Route one inbound message to its completion.
///
/// Keep-alive (subscription) entries forward the payload and stay; an
/// error response tears the subscription down by ending the stream. Plain
/// entries resolve once and are removed.
fn dispatch(shared: &Shared, message: Message) {
    let id = message.id;
    let keep_alive = shared
        .pending
        .get(&id)
        .map(|entry| matches!(entry.value(), Pending::Subscription(_)));

    match keep_alive {
        Some(true) => {
            if message.error.is_some() {
                warn!(id, error = ?message.error, "subscription failed server-side");
                shared.pending.remove(&id);
            } else if message.callback_id.is_some() {
                if let Some(entry) = shared.pending.get(&id) {
                    if let Pending::Subscription(tx) = entry.value() {
                        let _ = tx.send(message.data.unwrap_or(EngineValue::Null));
                    }
                }
            }
        }
        Some(false) => {
            if let Some((_, Pending::Once(tx))) = shared.pending.remove(&id) {
                let result = match message.error {
                    Some(error) => Err(Error::Remote(error)),
                    None => Ok(message.data.unwrap_or(EngineValue::Null)),
                };
                let _ = tx.send(result);
            }
        }
        None => warn!(id, "inbound message matches no pending request"),
    }
}

fn fail_all(shared: &Shared, error: fn() -> Error) {
    let ids: Vec<i64> = shared.pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, pending)) = shared.pending.remove(&id) {
            match pending {
                Pending::Once(tx) => {
                    let _ = tx.send(Err(error()));
                }
                // Dropping the sender ends the stream.
                Pending::Subscription(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::UpdateMode;
    use colonnade_engine_memory::MemoryEngine;
    use colonnade_server::{Server, ServerConfig};
    use colonnade_transport_memory::MemoryTransport;

    fn row() -> EngineValue {
        EngineValue::mapping([(
            "price",
            EngineValue::Sequence(vec![EngineValue::Float(101.5)]),
        )])
    }

    // One subscription entry in the pending table serves every push; it
    // is removed only by an explicit unsubscribe.
    #[tokio::test]
    async fn test_many_pushes_leave_one_pending_entry() {
        let server = Arc::new(Server::new(
            Arc::new(MemoryEngine::new()),
            ServerConfig::default(),
        ));
        let handle = server
            .serve(&MemoryTransport::new(), "client-keepalive")
            .await
            .unwrap();
        let client = Client::connect(
            &MemoryTransport::new(),
            "client-keepalive",
            Config::default(),
        )
        .await
        .unwrap();

        let table = client
            .create_table(
                "quotes",
                EngineValue::mapping([("price", EngineValue::from("float"))]),
                EngineValue::empty_mapping(),
            )
            .await
            .unwrap();
        let view = table.view(None, EngineValue::Null).await.unwrap();
        let mut updates = view.on_update(UpdateMode::Notify).unwrap();

        for _ in 0..1000 {
            table.update(row(), 0).await.unwrap();
        }
        for _ in 0..1000 {
            updates.next().await.unwrap();
        }
        assert_eq!(client.pending_len(), 1);

        view.remove_update(updates).await.unwrap();
        assert_eq!(client.pending_len(), 0);

        client.shutdown().await;
        handle.shutdown().await;
    }
}
