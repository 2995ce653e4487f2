//! Server integration tests over the in-memory transport.
//!
//! These drive a real accept loop with hand-rolled wire traffic: a raw
//! connection plus the protocol encoder/decoder, no client crate involved.

use colonnade_engine_memory::MemoryEngine;
use colonnade_protocol::{Decoded, EngineValue, FrameDecoder, FrameEncoder, Message, PING, PONG};
use colonnade_server::{Server, ServerConfig};
use colonnade_transport::{Connection, Frame, Transport};
use colonnade_transport_memory::MemoryTransport;
use std::sync::Arc;
use std::time::Duration;

struct Wire {
    connection: Box<dyn Connection>,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
}

impl Wire {
    async fn connect(addr: &str) -> Self {
        let transport = MemoryTransport::new();
        let connection = transport.connect(addr).await.unwrap();
        Self {
            connection,
            encoder: FrameEncoder::new(64),
            decoder: FrameDecoder::new(16 * 1024 * 1024),
        }
    }

    async fn send(&self, message: Message) {
        for frame in self.encoder.encode(message).unwrap() {
            self.connection.send(frame).await.unwrap();
        }
    }

    async fn recv(&mut self) -> Message {
        loop {
            let frame = self
                .connection
                .recv()
                .await
                .expect("connection closed while awaiting a message");
            match self.decoder.decode(frame).unwrap() {
                Decoded::Complete(mut messages) => return messages.remove(0),
                Decoded::Incomplete | Decoded::Pong | Decoded::Ping => {}
            }
        }
    }
}

async fn start_server(addr: &str) -> (Arc<Server>, colonnade_server::ServerHandle) {
    let _ = tracing_subscriber::fmt::try_init();
    let server = Arc::new(Server::new(
        Arc::new(MemoryEngine::new()),
        ServerConfig::default(),
    ));
    let handle = server.serve(&MemoryTransport::new(), addr).await.unwrap();
    (server, handle)
}

fn schema() -> EngineValue {
    EngineValue::mapping([
        ("price", EngineValue::from("float")),
        ("symbol", EngineValue::from("string")),
    ])
}

#[tokio::test]
async fn test_handshake_and_schema_echo() {
    let (_server, handle) = start_server("it-handshake").await;
    let mut wire = Wire::connect("it-handshake").await;

    wire.send(Message::init()).await;
    let reply = wire.recv().await;
    assert_eq!(reply.id, -1);
    assert!(reply.data.unwrap().get("version").is_some());

    wire.send(Message::create_table(
        1,
        "quotes",
        schema(),
        EngineValue::empty_mapping(),
    ))
    .await;
    assert_eq!(
        wire.recv().await.data,
        Some(EngineValue::Str("quotes".to_string()))
    );

    wire.send(Message::create_view(2, "quotes", None, EngineValue::Null))
        .await;
    let view_name = match wire.recv().await.data.unwrap() {
        EngineValue::Str(name) => name,
        other => panic!("expected a view name, got {other:?}"),
    };

    wire.send(Message::view_method(3, &view_name, "schema", vec![]))
        .await;
    let reply = wire.recv().await;
    assert_eq!(reply.id, 3);
    assert_eq!(reply.data, Some(schema()));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_literal_gets_pong() {
    let (_server, handle) = start_server("it-heartbeat").await;
    let wire = Wire::connect("it-heartbeat").await;

    wire.connection
        .send(Frame::Text(PING.to_string()))
        .await
        .unwrap();
    let frame = wire.connection.recv().await.unwrap();
    assert_eq!(frame, Frame::Text(PONG.to_string()));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_delta_subscription_streams_binary_pushes() {
    let (_server, handle) = start_server("it-delta").await;
    let mut wire = Wire::connect("it-delta").await;

    wire.send(Message::create_table(
        1,
        "quotes",
        schema(),
        EngineValue::empty_mapping(),
    ))
    .await;
    wire.recv().await;
    wire.send(Message::create_view(
        2,
        "quotes",
        Some("live".to_string()),
        EngineValue::Null,
    ))
    .await;
    wire.recv().await;

    wire.send(
        Message::view_method(
            3,
            "live",
            "on_update",
            vec![EngineValue::mapping([(
                "mode",
                EngineValue::from("delta"),
            )])],
        )
        .with_subscription(5),
    )
    .await;

    let update = EngineValue::mapping([(
        "price",
        EngineValue::Sequence(vec![EngineValue::Float(9.25)]),
    )]);
    wire.send(Message::table_method(4, "quotes", "update", vec![update.clone()]))
        .await;

    // The update's own ack, then the push with a reassembled delta.
    assert_eq!(wire.recv().await.id, 4);
    let push = wire.recv().await;
    assert_eq!(push.id, 3);
    assert_eq!(push.callback_id, Some(5));
    let data = push.data.unwrap();
    assert_eq!(data.get("port_id"), Some(&EngineValue::Int(0)));
    let delta = data.get("delta").and_then(EngineValue::as_binary).unwrap();
    let decoded: EngineValue = serde_json::from_slice(delta).unwrap();
    assert_eq!(decoded, update);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_error_response_preserves_connection() {
    let (_server, handle) = start_server("it-errors").await;
    let mut wire = Wire::connect("it-errors").await;

    wire.send(Message::table_method(1, "missing", "schema", vec![]))
        .await;
    let reply = wire.recv().await;
    assert_eq!(reply.error.unwrap().code, "NotFound");

    // The connection survives the error.
    wire.send(Message::create_table(
        2,
        "quotes",
        schema(),
        EngineValue::empty_mapping(),
    ))
    .await;
    assert!(wire.recv().await.error.is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_hosted_table_served_until_dropped() {
    use colonnade_engine::Engine;

    let (server, handle) = start_server("it-hosted").await;
    let engine = MemoryEngine::new();
    let table = engine.table(schema(), EngineValue::empty_mapping()).unwrap();
    server.router().host_table("rates", table).unwrap();

    let mut wire = Wire::connect("it-hosted").await;
    wire.send(Message::table_method(1, "rates", "schema", vec![]))
        .await;
    assert_eq!(wire.recv().await.data, Some(schema()));

    server.router().drop_table("rates");
    wire.send(Message::table_method(2, "rates", "schema", vec![]))
        .await;
    assert_eq!(wire.recv().await.error.unwrap().code, "NotFound");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unparseable_frame_closes_connection() {
    let (_server, handle) = start_server("it-garbage").await;
    let wire = Wire::connect("it-garbage").await;

    wire.connection
        .send(Frame::Text("this is not json".to_string()))
        .await
        .unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if wire.connection.recv().await.is_none() {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the connection");

    handle.shutdown().await;
}
