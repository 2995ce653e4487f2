//! The connection-accepting server.
//!
//! One task per connection runs the read loop: decode, answer heartbeats,
//! dispatch through the router. A companion writer task drains the
//! session's outbound channel so every logical message's frame sequence
//! reaches the transport contiguously.

use colonnade_engine::Engine;
use colonnade_protocol::{Decoded, FrameDecoder, PONG};
use colonnade_transport::{Config, Connection, Frame, Listener, Transport, TransportError};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::router::Router;
use crate::session::Session;

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Framing limits and heartbeat interval shared with clients.
    pub transport: Config,
    /// Maximum number of simultaneously connected sessions.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Config::default(),
            max_connections: 256,
        }
    }
}

/// A protocol server bound to one engine.
pub struct Server {
    router: Arc<Router>,
    config: ServerConfig,
}

/// Handle for stopping a running server.
pub struct ServerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the accept loop to exit.
    /// Connections already established drain independently.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

impl Server {
    /// Create a server over the given engine.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>, config: ServerConfig) -> Self {
        let heartbeat_ms = config.transport.heartbeat_interval.as_millis() as i64;
        Self {
            router: Arc::new(Router::new(engine, heartbeat_ms)),
            config,
        }
    }

    /// The router, for host-side table registration and locking.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Bind a listener and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot bind the address.
    pub async fn serve<T: Transport>(
        self: &Arc<Self>,
        transport: &T,
        addr: &str,
    ) -> Result<ServerHandle, TransportError> {
        let listener = transport.listen(addr).await?;
        info!(addr, "server listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = Arc::clone(self);
        let task = tokio::spawn(async move {
            server.accept_loop(listener, shutdown_rx).await;
        });
        Ok(ServerHandle { shutdown_tx, task })
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: Box<dyn Listener>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let connection = match accepted {
                        Ok(connection) => connection,
                        Err(e) => {
                            error!(error = %e, "accept failed, stopping");
                            break;
                        }
                    };
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        warn!("connection limit reached, rejecting");
                        let _ = connection.close().await;
                        continue;
                    };
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(connection).await;
                        drop(permit);
                    });
                }
            }
        }
        let _ = listener.close().await;
    }

    async fn handle_connection(&self, connection: Box<dyn Connection>) {
        let connection: Arc<dyn Connection> = Arc::from(connection);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<Frame>>();
        let session = Arc::new(Session::new(
            outbound_tx,
            self.config.transport.chunk_size,
        ));
        debug!(session_id = %session.id(), "session opened");

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

        let mut decoder = FrameDecoder::new(self.config.transport.max_binary_size);
        while let Some(frame) = connection.recv().await {
            match decoder.decode(frame) {
                Ok(Decoded::Ping) => session.enqueue(vec![Frame::Text(PONG.to_string())]),
                Ok(Decoded::Pong) => {}
                Ok(Decoded::Incomplete) => {}
                Ok(Decoded::Complete(messages)) => {
                    for message in messages {
                        self.router.handle(message, &session);
                    }
                }
                Err(e) => {
                    // Framing errors are unrecoverable: the decoder can no
                    // longer tell which transfer later bytes belong to.
                    error!(session_id = %session.id(), error = %e, "protocol error, closing connection");
                    break;
                }
            }
        }

        self.router.close_session(&session);
        drop(session);
        let _ = writer.await;
        let _ = connection.close().await;
    }
}
