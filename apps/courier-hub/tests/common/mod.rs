#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use courier_common::Envelope;
use courier_connector::{Connector, Inbound};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use courier_hub::config::Config;
use courier_hub::AppState;

pub const TEST_SECRET: &str = "test-secret-do-not-use-in-production";

pub type RawSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A config with a fixed secret and otherwise default settings.
pub fn test_config() -> Config {
    Config {
        authentication_key: TEST_SECRET.to_string(),
        ..Config::default()
    }
}

/// Build the full application router wired to a fresh hub.
pub fn test_app(config: Config) -> (Router, AppState) {
    let state = AppState::new(config);
    let app = courier_hub::routes::router(&state).with_state(state.clone());
    (app, state)
}

/// Start a real TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server_with(config: Config) -> (SocketAddr, AppState) {
    let (app, state) = test_app(config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub async fn start_ws_server() -> (SocketAddr, AppState) {
    start_ws_server_with(test_config()).await
}

pub fn ws_url(addr: SocketAddr, state: &AppState) -> String {
    format!("ws://{addr}{}", state.config.web_socket_path)
}

/// Connect a node through the connector crate.
pub async fn connect_node(addr: SocketAddr, state: &AppState, source_id: &str) -> (Connector, Inbound) {
    Connector::connect(&ws_url(addr, state), TEST_SECRET, source_id)
        .await
        .expect("connector connect")
}

/// Open a bare WebSocket and send `first_frame` as the handshake token.
pub async fn connect_raw(addr: SocketAddr, state: &AppState, first_frame: &str) -> RawSocket {
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url(addr, state))
        .await
        .expect("ws connect");
    ws.send(tungstenite::Message::Text(first_frame.to_string().into()))
        .await
        .expect("send handshake");
    ws
}

/// Wait until the hub reports exactly `n` registered sessions.
pub async fn wait_for_sessions(state: &AppState, n: usize) {
    let waited = time::timeout(Duration::from_secs(5), async {
        while state.hub.session_count() != n {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        waited.is_ok(),
        "expected {n} sessions, hub has {}",
        state.hub.session_count()
    );
}

/// Next envelope delivered to a node.
pub async fn expect_envelope(inbound: &mut Inbound) -> Envelope {
    time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("timeout waiting for envelope")
        .expect("inbound closed")
}

/// Assert nothing arrives for a short while.
pub async fn expect_silence(inbound: &mut Inbound) {
    if let Ok(Some(envelope)) = time::timeout(Duration::from_millis(300), inbound.recv()).await {
        panic!("expected no delivery, got {envelope:?}");
    }
}

/// Next frame on a raw socket.
pub async fn next_frame(ws: &mut RawSocket) -> tungstenite::Message {
    time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("read error")
}

/// Assert the next frame is a close frame with `code`.
pub async fn expect_close(ws: &mut RawSocket, code: u16) {
    match next_frame(ws).await {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(
                frame.code,
                tungstenite::protocol::frame::coding::CloseCode::from(code)
            );
        }
        other => panic!("Expected Close frame, got: {other:?}"),
    }
}
