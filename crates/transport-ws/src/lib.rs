//! WebSocket transport implementation
//!
//! Maps the protocol's frame kinds onto native WebSocket frames: text
//! frames carry control messages, binary frames carry payload chunks.
//! WebSocket-level Ping/Pong control frames are answered here and never
//! surfaced; they are distinct from the protocol's reserved `"ping"` /
//! `"pong"` text literals, which pass through like any other text frame.

use async_trait::async_trait;
use colonnade_transport::{Connection, Frame, Listener, Transport, TransportError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async, connect_async};
use tracing::{debug, info, warn};
use url::Url;

/// WebSocket transport implementation
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        let url = Url::parse(addr)
            .map_err(|e| TransportError::InvalidAddress(format!("Invalid URL: {e}")))?;

        debug!("Connecting to WebSocket at {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("WebSocket connect failed: {e}"))
        })?;

        Ok(Box::new(WsConnection::new(ws_stream)))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            TransportError::InvalidAddress(format!("Failed to bind {addr}: {e}"))
        })?;

        info!("WebSocket listener bound at {}", addr);

        Ok(Box::new(WsListener { listener }))
    }
}

struct WsListener {
    listener: TcpListener,
}

#[async_trait]
impl Listener for WsListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        debug!("Accepting WebSocket handshake from {}", peer);

        let ws_stream = accept_async(stream).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("WebSocket handshake failed: {e}"))
        })?;

        Ok(Box::new(WsConnection::new(ws_stream)))
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        // Dropping the TcpListener releases the endpoint.
        Ok(())
    }
}

/// A WebSocket connection, generic over the underlying byte stream so the
/// same type serves client (TLS-capable) and server (plain TCP) sides.
struct WsConnection<S> {
    sink: Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>,
    stream: Arc<Mutex<SplitStream<WebSocketStream<S>>>>,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(ws_stream: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws_stream.split();
        Self {
            sink: Arc::new(Mutex::new(sink)),
            stream: Arc::new(Mutex::new(stream)),
        }
    }
}

#[async_trait]
impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        let mut sink = self.sink.lock().await;
        sink.send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Option<Frame> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => return Some(Frame::Text(text.to_string())),
                Ok(Message::Binary(bytes)) => return Some(Frame::Binary(bytes)),
                Ok(Message::Ping(payload)) => {
                    // Answer transport-level pings inline.
                    let mut sink = self.sink.lock().await;
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        return None;
                    }
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by peer");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    return None;
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        sink.close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
