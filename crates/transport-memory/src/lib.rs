//! In-memory transport implementation for testing
//!
//! This transport routes frames between endpoints within the same process,
//! perfect for testing and development scenarios.

use async_trait::async_trait;
use colonnade_transport::{Connection, Frame, Listener, Transport, TransportError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global registry of memory listeners for cross-connection routing
static GLOBAL_REGISTRY: once_cell::sync::Lazy<Arc<DashMap<String, MemoryListener>>> =
    once_cell::sync::Lazy::new(|| Arc::new(DashMap::new()));

/// Memory transport implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport;

impl MemoryTransport {
    /// Create a new memory transport
    pub fn new() -> Self {
        Self
    }

    /// Clear all global state (useful for tests)
    pub fn clear_global_state() {
        GLOBAL_REGISTRY.clear();
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        debug!("Connecting to memory endpoint {}", addr);

        // Find the listener at this address
        let listener = GLOBAL_REGISTRY.get(addr).ok_or_else(|| {
            TransportError::ConnectionFailed(format!("No listener at {addr}"))
        })?;

        // Create a bidirectional connection pair
        let (client_to_server_tx, client_to_server_rx) = flume::bounded(256);
        let (server_to_client_tx, server_to_client_rx) = flume::bounded(256);

        let client_conn = MemoryConnection {
            sender: client_to_server_tx,
            receiver: Arc::new(RwLock::new(server_to_client_rx)),
            closed: Arc::new(RwLock::new(false)),
        };

        let server_conn = MemoryConnection {
            sender: server_to_client_tx,
            receiver: Arc::new(RwLock::new(client_to_server_rx)),
            closed: Arc::new(RwLock::new(false)),
        };

        // Hand the server side to the listener
        listener
            .incoming_tx
            .send_async(Box::new(server_conn))
            .await
            .map_err(|_| TransportError::ConnectionFailed("Listener closed".to_string()))?;

        info!("Memory connection established to {}", addr);

        Ok(Box::new(client_conn))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError> {
        debug!("Creating memory listener at {}", addr);

        if GLOBAL_REGISTRY.contains_key(addr) {
            return Err(TransportError::Other(format!(
                "Address {addr} already has a listener"
            )));
        }

        let (incoming_tx, incoming_rx) = flume::unbounded();
        let listener = MemoryListener {
            addr: addr.to_string(),
            incoming_rx: Arc::new(RwLock::new(incoming_rx)),
            incoming_tx,
        };

        GLOBAL_REGISTRY.insert(addr.to_string(), listener.clone());

        info!("Memory listener created at {}", addr);

        Ok(Box::new(listener))
    }
}

/// Memory listener that hands out the server half of connection pairs
#[derive(Clone)]
struct MemoryListener {
    addr: String,
    incoming_rx: Arc<RwLock<flume::Receiver<Box<dyn Connection>>>>,
    incoming_tx: flume::Sender<Box<dyn Connection>>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let rx = self.incoming_rx.read().await;
        rx.recv_async()
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        GLOBAL_REGISTRY.remove(&self.addr);
        Ok(())
    }
}

/// One half of an in-process connection pair
struct MemoryConnection {
    sender: flume::Sender<Frame>,
    receiver: Arc<RwLock<flume::Receiver<Frame>>>,
    closed: Arc<RwLock<bool>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if *self.closed.read().await {
            return Err(TransportError::ConnectionClosed);
        }
        self.sender
            .send_async(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Option<Frame> {
        if *self.closed.read().await {
            return None;
        }
        let rx = self.receiver.read().await;
        rx.recv_async().await.ok()
    }

    async fn close(&self) -> Result<(), TransportError> {
        *self.closed.write().await = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_connect_and_exchange_frames() {
        let transport = MemoryTransport::new();
        let listener = transport.listen("mem://frames").await.unwrap();

        let client = transport.connect("mem://frames").await.unwrap();
        let server = listener.accept().await.unwrap();

        client
            .send(Frame::Text("hello".to_string()))
            .await
            .unwrap();
        assert_eq!(
            server.recv().await,
            Some(Frame::Text("hello".to_string()))
        );

        server
            .send(Frame::Binary(Bytes::from_static(b"\x01\x02")))
            .await
            .unwrap();
        assert_eq!(
            client.recv().await,
            Some(Frame::Binary(Bytes::from_static(b"\x01\x02")))
        );
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let transport = MemoryTransport::new();
        assert!(transport.connect("mem://nobody").await.is_err());
    }

    #[tokio::test]
    async fn test_frames_preserve_order() {
        let transport = MemoryTransport::new();
        let listener = transport.listen("mem://order").await.unwrap();
        let client = transport.connect("mem://order").await.unwrap();
        let server = listener.accept().await.unwrap();

        client.send(Frame::Text("announce".to_string())).await.unwrap();
        client
            .send(Frame::Binary(Bytes::from_static(b"aa")))
            .await
            .unwrap();
        client
            .send(Frame::Binary(Bytes::from_static(b"bb")))
            .await
            .unwrap();

        assert_eq!(
            server.recv().await,
            Some(Frame::Text("announce".to_string()))
        );
        assert_eq!(
            server.recv().await,
            Some(Frame::Binary(Bytes::from_static(b"aa")))
        );
        assert_eq!(
            server.recv().await,
            Some(Frame::Binary(Bytes::from_static(b"bb")))
        );
    }
}
