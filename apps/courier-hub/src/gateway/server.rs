//! WebSocket upgrade handler and the per-connection inbound/outbound loops.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use courier_common::Envelope;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use subtle::ConstantTimeEq;
use tokio::time;

use crate::error::{HandshakeError, CLOSE_NORMAL};
use crate::AppState;

use super::hub::HubHandle;
use super::session::{OutboundRx, Session};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// How long the outbound loop gets to flush its close frame after the
/// inbound side has finished.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub fn router(path: &str) -> Router<AppState> {
    Router::new().route(path, get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: the first frame must be the shared secret.
    let timeout = state.config.handshake_timeout();
    let handshake = match time::timeout(
        timeout,
        authenticate(&mut ws_rx, &state.config.authentication_key),
    )
    .await
    {
        Ok(result) => result,
        Err(_elapsed) => Err(HandshakeError::Timeout(timeout)),
    };
    if let Err(e) = handshake {
        tracing::debug!(error = %e, "handshake rejected");
        let _ = send_close(&mut ws_tx, e.close_code(), e.close_reason()).await;
        return;
    }

    // Step 2: register and run both loops.
    let (session, outbound) = Session::new(state.config.outbound_queue_capacity);
    let session_id = session.id().to_string();
    let shed = session.shed_signal();
    state.hub.register(session).await;
    tracing::info!(%session_id, "session established");

    let mut writer = tokio::spawn(write_loop(session_id.clone(), ws_tx, outbound));

    let ended = tokio::select! {
        biased;
        () = shed.cancelled() => LoopEnd::Shed,
        _ = read_loop(&session_id, ws_rx, &state.hub) => LoopEnd::Inbound,
        _ = &mut writer => LoopEnd::Outbound,
    };

    // No-op if the hub already shed this session.
    state.hub.deregister(&session_id).await;

    match ended {
        LoopEnd::Shed => {
            // The peer is not keeping up; drop the socket without flushing.
            tracing::warn!(%session_id, "session shed by hub, dropping connection");
            writer.abort();
        }
        LoopEnd::Inbound => {
            // Deregistering closed the queue; the writer sends a close frame
            // and exits.
            if time::timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await.is_err() {
                tracing::debug!(%session_id, "outbound loop did not stop in time, aborting");
                writer.abort();
            }
        }
        LoopEnd::Outbound => {}
    }

    tracing::info!(%session_id, "session ended");
}

/// Which side of a session finished first.
enum LoopEnd {
    Shed,
    Inbound,
    Outbound,
}

/// Wait for the first data frame and compare it with `secret`.
async fn authenticate(ws_rx: &mut WsStream, secret: &str) -> Result<(), HandshakeError> {
    while let Some(msg) = ws_rx.next().await {
        let matches = match msg? {
            Message::Text(token) => token_matches(token.as_str().as_bytes(), secret),
            Message::Binary(token) => token_matches(&token, secret),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Err(HandshakeError::Closed),
        };
        return if matches {
            Ok(())
        } else {
            Err(HandshakeError::SecretMismatch)
        };
    }
    Err(HandshakeError::Closed)
}

fn token_matches(token: &[u8], secret: &str) -> bool {
    token.ct_eq(secret.as_bytes()).into()
}

/// Inbound loop: decode frames and hand them to the hub.
///
/// Returns on a close frame, end of stream, or a transport error. Malformed
/// frames are dropped and the session stays up.
async fn read_loop(session_id: &str, mut ws_rx: WsStream, hub: &HubHandle) {
    while let Some(msg) = ws_rx.next().await {
        let decoded = match msg {
            Ok(Message::Text(text)) => Envelope::decode(text.as_str().as_bytes()),
            Ok(Message::Binary(bytes)) => Envelope::decode(&bytes),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(?e, %session_id, "ws read error");
                break;
            }
        };

        match decoded {
            Ok(envelope) => {
                tracing::trace!(%session_id, envelope_id = %envelope.id(), "envelope received");
                hub.broadcast(envelope, Some(session_id)).await;
            }
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "dropping malformed frame");
            }
        }
    }
}

/// Outbound loop: drain the session's queue onto the socket.
///
/// Ends on a send failure, or once the hub closes the queue, in which case
/// the peer gets a close frame.
async fn write_loop(session_id: String, mut ws_tx: WsSink, mut outbound: OutboundRx) {
    while let Some(envelope) = outbound.recv().await {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(%session_id, envelope_id = %envelope.id(), error = %e, "failed to encode envelope");
                continue;
            }
        };
        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
            tracing::debug!(?e, %session_id, "ws write error");
            return;
        }
    }

    let _ = send_close(&mut ws_tx, CLOSE_NORMAL, "Session closed").await;
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
